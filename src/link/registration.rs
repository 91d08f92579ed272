//! # Registration Handshake
//!
//! The Module M stays silent until the host announces itself with the `*A`
//! request, after which the device answers with a `*B` confirmation carrying
//! its serial number. The request is a keep-retrying announce rather than a
//! request/response pair: the device may miss the first one during a boot
//! race, so it is repeated every couple of seconds until the confirmation
//! shows up.
//!
//! While unregistered, everything on the wire except the confirmation is
//! boot noise and is discarded instead of buffered for replay.

use crate::constants::{
    FRAME_MARKER, IDENTITY_LEN, REGISTER_CONFIRM_HEADER, REGISTER_CONFIRM_LEN,
    REGISTER_REQUEST_INTERVAL,
};
use crate::link::buffer::ResyncBuffer;
use crate::link::frame::DeviceIdentity;
use crate::logging::log_debug;
use std::time::Instant;

/// Tracks the registered/unregistered state of the link and paces the
/// registration announces.
#[derive(Debug, Default)]
pub struct RegistrationHandshake {
    registered: bool,
    identity: Option<DeviceIdentity>,
    last_request: Option<Instant>,
}

impl RegistrationHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Last captured identity. Survives disconnects so the last-known serial
    /// stays visible; replaced on the next confirmation.
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Drop back to unregistered, e.g. after a serial error. The captured
    /// identity is retained until a fresh registration overwrites it.
    pub fn reset(&mut self) {
        self.registered = false;
        self.last_request = None;
    }

    /// Whether a registration request should be written this cycle. Requests
    /// are spaced at least [`REGISTER_REQUEST_INTERVAL`] apart regardless of
    /// read activity; calling this marks the request as sent.
    pub fn request_due(&mut self, now: Instant) -> bool {
        if self.registered {
            return false;
        }
        match self.last_request {
            Some(at) if now.duration_since(at) < REGISTER_REQUEST_INTERVAL => false,
            _ => {
                self.last_request = Some(now);
                true
            }
        }
    }

    /// Scan the buffer for the registration confirmation.
    ///
    /// The `*B` sequence is searched anywhere in the buffer, not just at the
    /// head, because boot-time noise may precede it. Once found, the full
    /// confirmation (2 header bytes plus 11 identity bytes) must be present
    /// before anything is consumed; otherwise the bytes from the header
    /// onwards are kept and the scan retries after the next read.
    ///
    /// Returns the captured identity exactly once per registration event.
    pub fn try_confirm(&mut self, buffer: &mut ResyncBuffer) -> Option<DeviceIdentity> {
        if self.registered {
            return None;
        }

        match buffer.find_pattern(&REGISTER_CONFIRM_HEADER) {
            Some(position) => {
                if position > 0 {
                    log_debug(&format!(
                        "discarding {position} noise bytes before registration confirmation"
                    ));
                    buffer.consume(position);
                }
                if buffer.len() < REGISTER_CONFIRM_LEN {
                    // Identity bytes still in flight.
                    return None;
                }
                let mut identity = [0u8; IDENTITY_LEN];
                identity.copy_from_slice(&buffer.as_slice()[2..REGISTER_CONFIRM_LEN]);
                buffer.consume(REGISTER_CONFIRM_LEN);

                let identity = DeviceIdentity::from(identity);
                self.registered = true;
                self.identity = Some(identity);
                Some(identity)
            }
            None => {
                // No confirmation in sight: everything buffered is noise,
                // except a trailing marker byte which may be the start of a
                // confirmation split across reads.
                let len = buffer.len();
                if len > 0 {
                    if buffer.as_slice()[len - 1] == FRAME_MARKER {
                        buffer.consume(len - 1);
                    } else {
                        buffer.clear();
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_request_pacing() {
        let mut handshake = RegistrationHandshake::new();
        let t0 = Instant::now();

        assert!(handshake.request_due(t0));
        assert!(!handshake.request_due(t0 + Duration::from_secs(1)));
        assert!(handshake.request_due(t0 + Duration::from_secs(3)));
    }

    #[test]
    fn test_no_request_once_registered() {
        let mut handshake = RegistrationHandshake::new();
        let mut buffer = ResyncBuffer::new();
        buffer.write(&[FRAME_MARKER, b'B']);
        buffer.write(b"SERIAL00001");
        assert!(handshake.try_confirm(&mut buffer).is_some());

        assert!(!handshake.request_due(Instant::now()));
    }
}
