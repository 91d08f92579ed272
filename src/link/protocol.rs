//! # Module M Link Protocol
//!
//! This module provides the connection-management state machine of the link.
//! [`LinkState`] is the pure half: it owns the resynchronization buffer, the
//! registration handshake and the decoded reading, and it turns fed bytes
//! into [`LinkEvent`]s without touching any I/O. [`ModuleMDriver`] wraps it
//! together with a [`ConnectionManager`] into the cooperative polling loop:
//! one tick reads whatever is pending, resynchronizes, decodes every
//! complete frame, and runs the staleness watchdog.
//!
//! Nothing in here is fatal. Transport errors drop the port and the
//! handshake, and the next tick rediscovers and re-announces.

use crate::constants::{DEFAULT_ERROR_ROTATE_INTERVAL, DEFAULT_STALENESS_THRESHOLD,
    DEFAULT_TICK_INTERVAL, REGISTER_REQUEST};
use crate::link::buffer::ResyncBuffer;
use crate::link::frame::{decode_frame, DecodeOutcome, DeviceIdentity, DeviceReading};
use crate::link::registration::RegistrationHandshake;
use crate::link::serial::{ConnectionManager, PortState, SerialConfig};
use crate::logging::{log_debug, log_info, log_warn};
use std::time::{Duration, Instant};

/// Combined state of the connection manager and the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Discovering,
    OpenUnregistered,
    OpenRegistered,
}

/// What one processing pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A `C` or `D` frame updated the reading.
    ReadingUpdated,
    /// A registration confirmation captured a (possibly new) identity.
    IdentityChanged(DeviceIdentity),
    /// An `E` frame replaced or cleared the error report.
    ErrorsUpdated,
    /// A frame with an unknown command byte was skipped.
    FrameUnrecognized(u8),
}

/// Driver configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub serial: SerialConfig,
    /// Time without a valid data frame before live values are zeroed and a
    /// reconnect is forced. Deployments use 10-20 seconds.
    pub staleness_threshold: Duration,
    /// Polling period of [`ModuleMDriver::run`].
    pub tick_interval: Duration,
    /// How long each error line stays visible before rotating to the next.
    pub error_rotate_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            serial: SerialConfig::default(),
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
            tick_interval: DEFAULT_TICK_INTERVAL,
            error_rotate_interval: DEFAULT_ERROR_ROTATE_INTERVAL,
        }
    }
}

/// The I/O-free protocol state machine: buffer, handshake, decoded state.
///
/// Exactly one mutator exists (the driver loop); consumers read snapshots.
#[derive(Debug)]
pub struct LinkState {
    buffer: ResyncBuffer,
    handshake: RegistrationHandshake,
    reading: DeviceReading,
    errors: Vec<String>,
    last_valid: Instant,
    staleness_threshold: Duration,
}

impl LinkState {
    pub fn new(staleness_threshold: Duration) -> Self {
        LinkState {
            buffer: ResyncBuffer::with_capacity(256),
            handshake: RegistrationHandshake::new(),
            reading: DeviceReading::default(),
            errors: Vec::new(),
            last_valid: Instant::now(),
            staleness_threshold,
        }
    }

    /// Append newly read bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.write(bytes);
    }

    pub fn reading(&self) -> &DeviceReading {
        &self.reading
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_registered(&self) -> bool {
        self.handshake.is_registered()
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.handshake.identity()
    }

    /// Whether a registration request should go out this cycle.
    pub fn registration_due(&mut self, now: Instant) -> bool {
        self.handshake.request_due(now)
    }

    /// Forget the session after a transport failure: back to unregistered,
    /// and whatever the dead port left in the buffer is garbage.
    pub fn reset_session(&mut self) {
        self.handshake.reset();
        self.buffer.clear();
    }

    /// One decode pass: resynchronize, then consume every complete frame in
    /// the buffer. A single read can contain several queued frames, so this
    /// loops until the buffer runs out of decodable data.
    pub fn process(&mut self, now: Instant) -> Vec<LinkEvent> {
        let mut events = Vec::new();

        loop {
            let dropped = self.buffer.trim_to_marker();
            if dropped > 0 {
                log_debug(&format!("dropped {dropped} garbage bytes before frame marker"));
            }

            if !self.handshake.is_registered() {
                match self.handshake.try_confirm(&mut self.buffer) {
                    Some(identity) => {
                        log_info(&format!("Module M registered, serial {identity}"));
                        events.push(LinkEvent::IdentityChanged(identity));
                        // Data frames may already be queued behind the
                        // confirmation.
                        continue;
                    }
                    None => break,
                }
            }

            if self.buffer.len() < 2 {
                break;
            }

            match decode_frame(&mut self.buffer) {
                DecodeOutcome::Incomplete => break,
                DecodeOutcome::Unrecognized(command) => {
                    log_debug(&format!("unrecognized frame command 0x{command:02X}"));
                    events.push(LinkEvent::FrameUnrecognized(command));
                }
                DecodeOutcome::Reading(frame) => {
                    self.reading.apply(&frame);
                    self.last_valid = now;
                    events.push(LinkEvent::ReadingUpdated);
                }
                DecodeOutcome::Errors(lines) => {
                    log_warn(&format!("Module M reported {} errors", lines.len()));
                    self.errors = lines;
                    events.push(LinkEvent::ErrorsUpdated);
                }
                DecodeOutcome::ErrorsCleared => {
                    self.errors.clear();
                    events.push(LinkEvent::ErrorsUpdated);
                }
            }
        }

        events
    }

    /// Staleness watchdog. When no valid `C`/`D` frame arrived for longer
    /// than the threshold, transient fields are zeroed (voltage and energy
    /// stay) and the caller must attempt a reconnect. The timestamp is reset
    /// so reconnect attempts pace at the threshold rather than every tick.
    pub fn check_staleness(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last_valid) <= self.staleness_threshold {
            return false;
        }
        self.reading.clear_transient();
        self.last_valid = now;
        true
    }
}

/// The driver loop: one [`ConnectionManager`] plus one [`LinkState`],
/// polled on a fixed cadence, with the snapshot surface consumers read.
pub struct ModuleMDriver {
    config: DriverConfig,
    manager: ConnectionManager,
    link: LinkState,
    pending_identity: Option<DeviceIdentity>,
    error_cursor: usize,
    visible_error: Option<String>,
    last_error_rotation: Instant,
}

impl ModuleMDriver {
    pub fn new(config: DriverConfig) -> Self {
        let manager = ConnectionManager::new(config.serial.clone());
        let link = LinkState::new(config.staleness_threshold);
        ModuleMDriver {
            config,
            manager,
            link,
            pending_identity: None,
            error_cursor: 0,
            visible_error: None,
            last_error_rotation: Instant::now(),
        }
    }

    /// Access the connection manager, e.g. to attach a transport directly.
    pub fn manager_mut(&mut self) -> &mut ConnectionManager {
        &mut self.manager
    }

    /// One pass of the cooperative polling loop: reconnect if needed, send a
    /// registration announce when due, read pending bytes, decode, and run
    /// the staleness watchdog.
    pub async fn tick(&mut self) -> Vec<LinkEvent> {
        let now = Instant::now();

        if !self.manager.is_open() {
            match self.manager.connect().await {
                Ok(()) => self.link.reset_session(),
                Err(crate::error::ModuleMError::DeviceNotFound) => {}
                Err(e) => log_warn(&format!("connect failed: {e}")),
            }
        }

        if self.manager.is_open() {
            if self.link.registration_due(now) {
                log_debug("announcing registration, sending *A");
                if let Err(e) = self.manager.write_all(&REGISTER_REQUEST).await {
                    log_warn(&format!("could not write registration request: {e}"));
                    self.link.reset_session();
                }
            }
        }

        if self.manager.is_open() {
            let mut scratch = [0u8; 512];
            match self.manager.read_available(&mut scratch).await {
                Ok(0) => {}
                Ok(n) => self.link.feed(&scratch[..n]),
                Err(e) => {
                    log_warn(&format!("serial read failed: {e}"));
                    self.link.reset_session();
                }
            }
        }

        let events = self.link.process(now);
        for event in &events {
            if let LinkEvent::IdentityChanged(identity) = event {
                self.pending_identity = Some(*identity);
            }
        }

        if self.link.check_staleness(now) {
            log_warn(&format!(
                "no valid frame for {:?}, clearing live values and reconnecting",
                self.config.staleness_threshold
            ));
            self.manager.disconnect();
            self.link.reset_session();
        }

        events
    }

    /// Drive [`Self::tick`] forever on the configured cadence.
    pub async fn run(&mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for event in self.tick().await {
                if event == LinkEvent::ReadingUpdated {
                    log_debug(&format!("reading: {}", self.link.reading()));
                }
            }
        }
    }

    /// Read-only copy of the latest reading. Consumers must copy, not alias.
    pub fn snapshot(&self) -> DeviceReading {
        *self.link.reading()
    }

    /// Combined connection state.
    pub fn connection_state(&self) -> ConnectionState {
        match (self.manager.state(), self.link.is_registered()) {
            (PortState::Open, true) => ConnectionState::OpenRegistered,
            (PortState::Open, false) => ConnectionState::OpenUnregistered,
            (PortState::Discovering, _) => ConnectionState::Discovering,
            (PortState::Disconnected, _) => ConnectionState::Disconnected,
        }
    }

    /// Last captured device identity, if any registration ever completed.
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.link.identity()
    }

    /// One-shot identity-changed signal: returns the new identity once after
    /// each registration event.
    pub fn take_identity_changed(&mut self) -> Option<DeviceIdentity> {
        self.pending_identity.take()
    }

    /// Current error report.
    pub fn errors(&self) -> &[String] {
        self.link.errors()
    }

    /// Path of the opened (or last opened) serial port.
    pub fn port_path(&self) -> Option<&str> {
        self.manager.port_path()
    }

    /// The single error line currently meant to be displayed. When the
    /// report holds several lines, the visible one rotates on the configured
    /// cadence, wrapping around the report.
    pub fn visible_error(&mut self, now: Instant) -> Option<String> {
        if now.duration_since(self.last_error_rotation) >= self.config.error_rotate_interval {
            self.last_error_rotation = now;
            let errors = self.link.errors();
            if errors.is_empty() {
                self.visible_error = None;
            } else {
                if self.error_cursor >= errors.len() {
                    self.error_cursor = 0;
                }
                self.visible_error = Some(errors[self.error_cursor].clone());
                self.error_cursor += 1;
            }
        }
        self.visible_error.clone()
    }
}
