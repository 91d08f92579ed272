//! # modulem-rs - A Rust Crate for the Module M Energy Meter Link
//!
//! The modulem-rs crate implements the serial link-layer protocol of the
//! Module M three-phase energy meter: a small binary framing protocol in
//! which every frame starts with a `*` marker byte followed by a one-byte
//! command.
//!
//! ## Features
//!
//! - Discover the meter by its USB vendor/product identity and open it over
//!   a serial port connection
//! - Register the host with the device and capture its serial number
//! - Resynchronize on garbage bytes and tolerate partial reads of any size
//! - Decode live readings, live + cumulative energy readings and error
//!   reports into typed values
//! - Zero transient values and reconnect when the device goes stale
//! - Support for logging and error handling
//!
//! ## Usage
//!
//! To use the modulem-rs crate in your Rust project, add the following to
//! your Cargo.toml file:
//!
//! ```toml
//! [dependencies]
//! modulem-rs = "0.3"
//! ```
//!
//! Then run the driver loop and poll snapshots from it:
//!
//! ```rust,no_run
//! use modulem_rs::{DriverConfig, ModuleMDriver};
//!
//! # async fn demo() {
//! let mut driver = ModuleMDriver::new(DriverConfig::default());
//! loop {
//!     driver.tick().await;
//!     let reading = driver.snapshot();
//!     println!("net power: {} W", reading.total_signed_power_w());
//! }
//! # }
//! ```

pub mod constants;
pub mod error;
pub mod link;
pub mod logging;

pub use crate::error::ModuleMError;
pub use crate::logging::{init_logger, log_info};

// Core link types
pub use link::frame::{DeviceIdentity, DeviceReading, EnergyFrame, LiveFrame};
pub use link::protocol::{ConnectionState, DriverConfig, LinkEvent, LinkState, ModuleMDriver};
pub use link::serial::{discover_port, ConnectionManager, SerialConfig};

/// Discover the Module M and open a connection manager for it.
///
/// # Arguments
/// * `config` - Serial configuration (USB identity, baud rate, timeouts)
///
/// # Returns
/// * `Ok(ConnectionManager)` - Manager holding the open port
/// * `Err(ModuleMError)` - No matching device, or the port could not be opened
pub async fn connect(config: SerialConfig) -> Result<ConnectionManager, ModuleMError> {
    let mut manager = ConnectionManager::new(config);
    manager.connect().await?;
    Ok(manager)
}
