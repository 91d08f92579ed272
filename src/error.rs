//! # Module M Error Handling
//!
//! This module defines the ModuleMError enum, which represents the different
//! error types that can occur in the modulem-rs crate. Every variant is
//! recoverable: the driver loop treats transport errors as a trigger for
//! rediscovery rather than as reasons to stop.

use thiserror::Error;

/// Represents the different error types that can occur in the Module M crate.
#[derive(Debug, Error)]
pub enum ModuleMError {
    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// Indicates that no serial device with the Module M USB identity was
    /// found during discovery.
    #[error("No Module M device found")]
    DeviceNotFound,

    /// Indicates that an I/O operation was attempted without an open port.
    #[error("Serial port is not open")]
    NotConnected,

    /// Indicates an error when parsing a Module M frame.
    #[error("Error parsing frame: {0}")]
    FrameParseError(String),

    /// A catch-all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}
