//! The link module contains the components responsible for the core Module M
//! protocol implementation: the resynchronizing byte buffer, the frame
//! decoders, the registration handshake, the serial connection manager and
//! the polling driver that ties them together.

pub mod buffer;
pub mod frame;
pub mod protocol;
pub mod registration;
pub mod serial;
pub mod serial_mock;

pub use buffer::ResyncBuffer;
pub use frame::{
    decode_frame, encode_live, parse_live, parse_live_energy, DecodeOutcome, DeviceIdentity,
    DeviceReading, EnergyFrame, LiveFrame,
};
pub use protocol::{ConnectionState, DriverConfig, LinkEvent, LinkState, ModuleMDriver};
pub use registration::RegistrationHandshake;
pub use serial::{discover_port, ConnectionManager, DiscoveredPort, PortState, SerialConfig, SerialLink};
pub use serial_mock::MockSerialPort;
