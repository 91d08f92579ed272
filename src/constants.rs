//! Module M Wire Protocol Constants
//!
//! This module defines the constants of the Module M serial framing protocol:
//! the frame-start marker, the command codes, the fixed frame lengths and the
//! timing parameters used by the link driver.

use std::time::Duration;

/// Every frame on the link starts with this marker byte (ASCII `*`).
pub const FRAME_MARKER: u8 = 0x2A;

/// Host-to-device registration request command.
pub const CMD_REGISTER_REQUEST: u8 = b'A';

/// Device-to-host registration confirmation command.
pub const CMD_REGISTER_CONFIRM: u8 = b'B';

/// Device-to-host live readings command (currents, voltages, powers).
pub const CMD_LIVE: u8 = b'C';

/// Device-to-host live readings plus cumulative energy command.
pub const CMD_LIVE_ENERGY: u8 = b'D';

/// Device-to-host error report command.
pub const CMD_ERROR_REPORT: u8 = b'E';

/// The complete registration request as written to the device.
pub const REGISTER_REQUEST: [u8; 2] = [FRAME_MARKER, CMD_REGISTER_REQUEST];

/// Header bytes of the registration confirmation (`*B`).
pub const REGISTER_CONFIRM_HEADER: [u8; 2] = [FRAME_MARKER, CMD_REGISTER_CONFIRM];

/// Length of the opaque device serial number carried by the confirmation.
pub const IDENTITY_LEN: usize = 11;

/// Total length of a registration confirmation: `*B` plus the identity bytes.
pub const REGISTER_CONFIRM_LEN: usize = 2 + IDENTITY_LEN;

/// Total length of a live readings (`C`) frame:
/// marker, command, 3 export flags, 9 little-endian u32 values.
pub const LIVE_FRAME_LEN: usize = 41;

/// Total length of a live + energy (`D`) frame: the `C` layout followed by
/// forward and reverse energy counters.
pub const LIVE_ENERGY_FRAME_LEN: usize = 49;

/// Length of the error report header: marker, command, line count.
pub const ERROR_HEADER_LEN: usize = 3;

/// Error report lines are terminated by CR LF.
pub const ERROR_LINE_TERMINATOR: [u8; 2] = [b'\r', b'\n'];

/// USB vendor id the Module M enumerates with.
pub const DEFAULT_VENDOR_ID: u16 = 0x239A;

/// USB product id the Module M enumerates with.
pub const DEFAULT_PRODUCT_ID: u16 = 0x80A4;

/// Documented line rate of the current protocol revision.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Line rate of the earlier protocol revision, kept for devices running
/// old firmware.
pub const LEGACY_BAUD_RATE: u32 = 115_200;

/// Minimum spacing between registration requests while unregistered.
pub const REGISTER_REQUEST_INTERVAL: Duration = Duration::from_secs(2);

/// Default time without a valid data frame before live values are zeroed
/// and a reconnect is attempted.
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(10);

/// Default driver polling period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(300);

/// Default period after which the visible error line advances to the next
/// entry of the report.
pub const DEFAULT_ERROR_ROTATE_INTERVAL: Duration = Duration::from_secs(10);
