//! # Module M Serial Connection Management
//!
//! This module owns the serial side of the link: discovering the device by
//! its USB vendor/product identity among the enumerated ports, opening it
//! with the protocol's line settings, and tearing the handle down again on
//! any I/O failure so the next driver cycle rediscovers from scratch.
//!
//! Whether the port is open is tracked explicitly and checked before every
//! I/O call; failures are never used as a state probe.

use crate::constants::{DEFAULT_BAUD_RATE, DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID};
use crate::error::ModuleMError;
use crate::logging::{log_debug, log_info, log_warn};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialPortType};

/// Configuration for locating and opening the Module M.
///
/// Resolved once at startup and passed into the [`ConnectionManager`];
/// nothing here is global state.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// USB vendor id to match during discovery.
    pub vendor_id: u16,
    /// USB product id to match during discovery.
    pub product_id: u16,
    /// Line rate. Defaults to the documented 9600 baud; devices on old
    /// firmware need [`crate::constants::LEGACY_BAUD_RATE`].
    pub baudrate: u32,
    /// Upper bound for one non-blocking read inside a driver tick.
    pub read_timeout: Duration,
    /// Helper executable invoked with the port name before opening, so a
    /// competing serial claimant releases the path. Unix only.
    pub release_helper: Option<String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            baudrate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(50),
            release_helper: None,
        }
    }
}

/// Whether the manager currently holds an open port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// No port and no matching device seen on the last attempt to open one.
    Disconnected,
    /// No port open; discovery is being retried every cycle.
    Discovering,
    /// Port open.
    Open,
}

/// A serial device that matched the configured USB identity.
#[derive(Debug, Clone)]
pub struct DiscoveredPort {
    /// Full device path to open (e.g. `/dev/ttyACM0`).
    pub path: String,
    /// Bare port name, as the release helper expects it.
    pub name: String,
}

/// Enumerate serial ports and return the first one matching the configured
/// vendor/product identity. Never blocks; a miss simply means "retry later".
pub fn discover_port(config: &SerialConfig) -> Option<DiscoveredPort> {
    for info in tokio_serial::available_ports().unwrap_or_default() {
        let SerialPortType::UsbPort(usb) = &info.port_type else {
            continue;
        };
        if usb.vid != config.vendor_id || usb.pid != config.product_id {
            continue;
        }
        let name = info
            .port_name
            .rsplit('/')
            .next()
            .unwrap_or(&info.port_name)
            .to_string();
        let path = if cfg!(unix) && !info.port_name.starts_with('/') {
            format!("/dev/{}", info.port_name)
        } else {
            info.port_name.clone()
        };
        return Some(DiscoveredPort { path, name });
    }
    None
}

/// Transport the link runs on. Implemented by the real serial stream and by
/// the mock port used in tests.
#[async_trait::async_trait]
pub trait SerialLink: AsyncRead + AsyncWrite + Unpin + Send {
    async fn flush(&mut self) -> Result<(), std::io::Error>;
}

#[async_trait::async_trait]
impl SerialLink for tokio_serial::SerialStream {
    async fn flush(&mut self) -> Result<(), std::io::Error> {
        AsyncWriteExt::flush(self).await
    }
}

/// Owns the serial handle and its lifecycle: discover, open, read, write,
/// drop on failure.
pub struct ConnectionManager {
    config: SerialConfig,
    port: Option<Box<dyn SerialLink>>,
    port_path: Option<String>,
    state: PortState,
}

impl ConnectionManager {
    pub fn new(config: SerialConfig) -> Self {
        ConnectionManager {
            config,
            port: None,
            port_path: None,
            state: PortState::Disconnected,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    /// Path of the currently (or last) opened port.
    pub fn port_path(&self) -> Option<&str> {
        self.port_path.as_deref()
    }

    /// Discover the device and open it. A discovery miss returns
    /// [`ModuleMError::DeviceNotFound`] without blocking; the caller retries
    /// on its next cycle.
    pub async fn connect(&mut self) -> Result<(), ModuleMError> {
        if self.port.is_some() {
            return Ok(());
        }

        self.state = PortState::Discovering;
        let Some(found) = discover_port(&self.config) else {
            log_debug("no Module M device found");
            return Err(ModuleMError::DeviceNotFound);
        };

        self.release_port(&found).await;

        let builder = tokio_serial::new(&found.path, self.config.baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None);
        match builder.open_native_async() {
            Ok(port) => {
                log_info(&format!("Found Module M on {}", found.path));
                self.port = Some(Box::new(port));
                self.port_path = Some(found.path);
                self.state = PortState::Open;
                Ok(())
            }
            Err(e) => {
                self.state = PortState::Disconnected;
                Err(ModuleMError::SerialPortError(e.to_string()))
            }
        }
    }

    /// Hand the manager an already-open transport. Used by tests and by
    /// callers bringing their own link (e.g. a pty).
    pub fn attach(&mut self, port: Box<dyn SerialLink>, path: &str) {
        self.port = Some(port);
        self.port_path = Some(path.to_string());
        self.state = PortState::Open;
    }

    /// Close the port, if open. The last-known path stays visible.
    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            log_info("closing Module M serial port");
        }
        self.state = PortState::Disconnected;
    }

    /// One bounded, non-blocking read into `scratch`. Returns 0 when nothing
    /// was pending within the read timeout. Any transport failure (including
    /// end-of-stream, which means the device vanished) drops the port.
    pub async fn read_available(&mut self, scratch: &mut [u8]) -> Result<usize, ModuleMError> {
        let Some(port) = self.port.as_mut() else {
            return Err(ModuleMError::NotConnected);
        };
        let result = timeout(self.config.read_timeout, port.read(scratch)).await;
        match result {
            Err(_) => Ok(0),
            Ok(Ok(0)) => {
                self.disconnect();
                Err(ModuleMError::SerialPortError("port closed".into()))
            }
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => {
                self.disconnect();
                Err(ModuleMError::SerialPortError(e.to_string()))
            }
        }
    }

    /// Write a complete buffer and flush it. Failure drops the port.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ModuleMError> {
        let Some(port) = self.port.as_mut() else {
            return Err(ModuleMError::NotConnected);
        };
        let result = async {
            port.write_all(bytes).await?;
            SerialLink::flush(port.as_mut()).await
        }
        .await;
        if let Err(e) = result {
            self.disconnect();
            return Err(ModuleMError::SerialPortError(e.to_string()));
        }
        Ok(())
    }

    #[cfg(unix)]
    async fn release_port(&self, found: &DiscoveredPort) {
        let Some(helper) = &self.config.release_helper else {
            return;
        };
        match tokio::process::Command::new(helper)
            .arg(&found.name)
            .status()
            .await
        {
            Ok(status) if !status.success() => {
                log_warn(&format!("release helper {helper} exited with {status}"));
            }
            Ok(_) => {}
            Err(e) => log_warn(&format!("could not run release helper {helper}: {e}")),
        }
    }

    #[cfg(not(unix))]
    async fn release_port(&self, _found: &DiscoveredPort) {}
}
