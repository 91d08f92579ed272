//! # Module M Frame Decoder
//!
//! This module provides the typed data model of the Module M link and the
//! decoders for the three device-to-host data frames. All frames start with
//! the `*` marker followed by a one-byte command:
//!
//! - `C`: live readings, fixed 41 bytes. Marker, command, three export flag
//!   bytes (one per current transformer, nonzero = exporting), then nine
//!   little-endian `u32` values: I1-I3 in milliamps, U1-U3 in millivolts,
//!   P1-P3 in watts.
//! - `D`: live readings plus cumulative energy, fixed 49 bytes. The `C`
//!   layout followed by forward and reverse energy counters in watt-hours.
//! - `E`: error report, variable length. Marker, command, a line-count byte,
//!   then CR LF terminated ASCII lines.
//!
//! Fixed-width bodies are parsed with `nom` streaming combinators, so a
//! short buffer surfaces as `Err::Incomplete` rather than an error: the
//! caller leaves the buffer untouched and retries once more bytes arrive.
//! The wire protocol carries no checksum; a length-validated fixed-width
//! decode cannot fail.

use crate::constants::{
    CMD_ERROR_REPORT, CMD_LIVE, CMD_LIVE_ENERGY, ERROR_HEADER_LEN, ERROR_LINE_TERMINATOR,
    FRAME_MARKER, IDENTITY_LEN, LIVE_ENERGY_FRAME_LEN, LIVE_FRAME_LEN,
};
use crate::link::buffer::ResyncBuffer;
use nom::bytes::streaming::{tag, take};
use nom::number::streaming::le_u32;
use nom::sequence::tuple;
use nom::IResult;
use std::fmt;

/// The latest decoded state of the meter.
///
/// All magnitudes are unsigned; power direction is carried separately by the
/// per-phase export flags and applied as a sign only by the consumer. Energy
/// fields are sticky: they are written by `D` frames only and keep their last
/// value across `C` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceReading {
    /// Per-phase export flag (power flowing outward) for CT1..CT3.
    pub export: [bool; 3],
    /// Per-phase current in milliamps.
    pub current_ma: [u32; 3],
    /// Per-phase voltage in millivolts.
    pub voltage_mv: [u32; 3],
    /// Per-phase power in watts.
    pub power_w: [u32; 3],
    /// Cumulative forward (imported) energy in watt-hours.
    pub energy_forward_wh: u32,
    /// Cumulative reverse (exported) energy in watt-hours.
    pub energy_reverse_wh: u32,
}

impl DeviceReading {
    /// Overwrite this reading with a decoded frame. Energy fields are only
    /// touched when the frame carried them.
    pub fn apply(&mut self, frame: &LiveFrame) {
        self.export = frame.export;
        self.current_ma = frame.current_ma;
        self.voltage_mv = frame.voltage_mv;
        self.power_w = frame.power_w;
        if let Some(energy) = frame.energy {
            self.energy_forward_wh = energy.forward_wh;
            self.energy_reverse_wh = energy.reverse_wh;
        }
    }

    /// Zero the transient electrical fields after a staleness timeout.
    ///
    /// Voltage and cumulative energy are left intact: a disconnected current
    /// transformer does not imply a dead grid voltage or a reset meter.
    pub fn clear_transient(&mut self) {
        self.current_ma = [0; 3];
        self.power_w = [0; 3];
    }

    /// Power of one phase with the export flag applied as a sign.
    pub fn signed_power_w(&self, phase: usize) -> i64 {
        let magnitude = i64::from(self.power_w[phase]);
        if self.export[phase] {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Net power over all three phases in watts.
    pub fn total_signed_power_w(&self) -> i64 {
        (0..3).map(|phase| self.signed_power_w(phase)).sum()
    }
}

impl fmt::Display for DeviceReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for phase in 0..3 {
            write!(
                f,
                "L{}: {:.3}V {:.3}A {}W | ",
                phase + 1,
                f64::from(self.voltage_mv[phase]) / 1000.0,
                f64::from(self.current_ma[phase]) / 1000.0,
                self.signed_power_w(phase),
            )?;
        }
        write!(
            f,
            "energy forward {:.3}kWh reverse {:.3}kWh",
            f64::from(self.energy_forward_wh) / 1000.0,
            f64::from(self.energy_reverse_wh) / 1000.0,
        )
    }
}

/// The opaque device serial number, captured from the registration
/// confirmation and immutable until the next registration event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity([u8; IDENTITY_LEN]);

impl DeviceIdentity {
    /// Raw identity bytes exactly as sent by the device.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; IDENTITY_LEN]> for DeviceIdentity {
    fn from(bytes: [u8; IDENTITY_LEN]) -> Self {
        DeviceIdentity(bytes)
    }
}

impl fmt::Display for DeviceIdentity {
    /// Devices ship printable ASCII serials; anything else is rendered hex.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            for b in &self.0 {
                write!(f, "{}", *b as char)?;
            }
            Ok(())
        } else {
            write!(f, "{}", hex::encode(self.0))
        }
    }
}

/// Decoded body of a `C` or `D` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveFrame {
    pub export: [bool; 3],
    pub current_ma: [u32; 3],
    pub voltage_mv: [u32; 3],
    pub power_w: [u32; 3],
    /// Present on `D` frames only.
    pub energy: Option<EnergyFrame>,
}

/// Cumulative energy counters carried by a `D` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyFrame {
    pub forward_wh: u32,
    pub reverse_wh: u32,
}

/// Result of one decode attempt against the front of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The buffer does not yet hold a complete frame; nothing was consumed.
    Incomplete,
    /// The command byte is not part of the protocol. The two header bytes
    /// were consumed; resynchronization handles whatever follows.
    Unrecognized(u8),
    /// A `C` or `D` frame was decoded and consumed.
    Reading(LiveFrame),
    /// An `E` frame replaced the error report. The rest of the buffer was
    /// sacrificed (the protocol does not delimit the end of an error block).
    Errors(Vec<String>),
    /// A zero-line `E` frame cleared the error report; trailing bytes were
    /// left for the next parse pass.
    ErrorsCleared,
}

fn phase_triple(input: &[u8]) -> IResult<&[u8], [u32; 3]> {
    let (input, (a, b, c)) = tuple((le_u32, le_u32, le_u32))(input)?;
    Ok((input, [a, b, c]))
}

fn live_body(input: &[u8]) -> IResult<&[u8], LiveFrame> {
    let (input, flags) = take(3usize)(input)?;
    let (input, current_ma) = phase_triple(input)?;
    let (input, voltage_mv) = phase_triple(input)?;
    let (input, power_w) = phase_triple(input)?;
    Ok((
        input,
        LiveFrame {
            export: [flags[0] != 0, flags[1] != 0, flags[2] != 0],
            current_ma,
            voltage_mv,
            power_w,
            energy: None,
        },
    ))
}

/// Parse a complete `C` frame, including its `*C` header.
pub fn parse_live(input: &[u8]) -> IResult<&[u8], LiveFrame> {
    let header = [FRAME_MARKER, CMD_LIVE];
    let (input, _) = tag(&header[..])(input)?;
    live_body(input)
}

/// Parse a complete `D` frame, including its `*D` header.
pub fn parse_live_energy(input: &[u8]) -> IResult<&[u8], LiveFrame> {
    let header = [FRAME_MARKER, CMD_LIVE_ENERGY];
    let (input, _) = tag(&header[..])(input)?;
    let (input, mut frame) = live_body(input)?;
    let (input, (forward_wh, reverse_wh)) = tuple((le_u32, le_u32))(input)?;
    frame.energy = Some(EnergyFrame {
        forward_wh,
        reverse_wh,
    });
    Ok((input, frame))
}

/// Encode a live frame back into its wire representation (`C` when it has no
/// energy counters, `D` when it does).
pub fn encode_live(frame: &LiveFrame) -> Vec<u8> {
    let mut data = Vec::with_capacity(LIVE_ENERGY_FRAME_LEN);
    data.push(FRAME_MARKER);
    data.push(if frame.energy.is_some() {
        CMD_LIVE_ENERGY
    } else {
        CMD_LIVE
    });
    for flag in frame.export {
        data.push(u8::from(flag));
    }
    for value in frame
        .current_ma
        .iter()
        .chain(frame.voltage_mv.iter())
        .chain(frame.power_w.iter())
    {
        data.extend_from_slice(&value.to_le_bytes());
    }
    if let Some(energy) = frame.energy {
        data.extend_from_slice(&energy.forward_wh.to_le_bytes());
        data.extend_from_slice(&energy.reverse_wh.to_le_bytes());
    }
    data
}

/// Outcome of decoding an error report frame.
enum ErrorFrameOutcome {
    Incomplete,
    Cleared,
    Report(Vec<String>),
}

/// Decode an `E` frame sitting at the front of `data`.
///
/// The declared number of CR LF terminated lines must be present before
/// anything is taken; with a zero count only the 3 header bytes are spoken
/// for. The first line still carries the header bytes in front of it because
/// the split runs over the whole buffer, so they are stripped afterwards.
fn decode_error_frame(data: &[u8]) -> ErrorFrameOutcome {
    if data.len() < ERROR_HEADER_LEN {
        return ErrorFrameOutcome::Incomplete;
    }
    let line_count = data[2] as usize;
    if line_count == 0 {
        return ErrorFrameOutcome::Cleared;
    }

    // The last segment is the unterminated remainder, so the number of
    // complete lines is one less than the segment count.
    let segments = split_lines(data);
    if segments.len() <= line_count {
        return ErrorFrameOutcome::Incomplete;
    }

    let mut lines = Vec::with_capacity(line_count);
    for (index, segment) in segments.iter().take(line_count).enumerate() {
        let segment = if index == 0 {
            &segment[ERROR_HEADER_LEN.min(segment.len())..]
        } else {
            segment
        };
        lines.push(String::from_utf8_lossy(segment).into_owned());
    }
    ErrorFrameOutcome::Report(lines)
}

/// Split on the CR LF terminator, like the wire format defines it. The
/// remainder after the last terminator is returned as a final segment.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut index = 0;
    while index + 1 < data.len() {
        if data[index..index + 2] == ERROR_LINE_TERMINATOR {
            segments.push(&data[start..index]);
            index += 2;
            start = index;
        } else {
            index += 1;
        }
    }
    segments.push(&data[start..]);
    segments
}

/// Decode one frame from the front of the buffer and consume it.
///
/// Preconditions: the buffer starts with the frame marker (resynchronization
/// already ran) and the handshake is registered. Insufficient data leaves the
/// buffer untouched so the caller can retry after the next read.
pub fn decode_frame(buffer: &mut ResyncBuffer) -> DecodeOutcome {
    enum Consume {
        None,
        Bytes(usize),
        All,
    }

    let (outcome, consume) = {
        let data = buffer.as_slice();
        if data.len() < 2 {
            return DecodeOutcome::Incomplete;
        }
        debug_assert_eq!(data[0], FRAME_MARKER);

        match data[1] {
            CMD_LIVE => match parse_live(data) {
                Ok((_, frame)) => (DecodeOutcome::Reading(frame), Consume::Bytes(LIVE_FRAME_LEN)),
                Err(_) => (DecodeOutcome::Incomplete, Consume::None),
            },
            CMD_LIVE_ENERGY => match parse_live_energy(data) {
                Ok((_, frame)) => (
                    DecodeOutcome::Reading(frame),
                    Consume::Bytes(LIVE_ENERGY_FRAME_LEN),
                ),
                Err(_) => (DecodeOutcome::Incomplete, Consume::None),
            },
            CMD_ERROR_REPORT => match decode_error_frame(data) {
                ErrorFrameOutcome::Incomplete => (DecodeOutcome::Incomplete, Consume::None),
                ErrorFrameOutcome::Cleared => {
                    (DecodeOutcome::ErrorsCleared, Consume::Bytes(ERROR_HEADER_LEN))
                }
                ErrorFrameOutcome::Report(lines) => (DecodeOutcome::Errors(lines), Consume::All),
            },
            command => (DecodeOutcome::Unrecognized(command), Consume::Bytes(2)),
        }
    };

    match consume {
        Consume::None => {}
        Consume::Bytes(count) => buffer.consume(count),
        Consume::All => buffer.clear(),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(energy: Option<EnergyFrame>) -> LiveFrame {
        LiveFrame {
            export: [false, false, true],
            current_ma: [1500, 0, 2750],
            voltage_mv: [230_000, 229_500, 231_250],
            power_w: [345, 0, 633],
            energy,
        }
    }

    #[test]
    fn test_live_frame_round_trip() {
        let frame = sample_frame(None);
        let wire = encode_live(&frame);
        assert_eq!(wire.len(), LIVE_FRAME_LEN);

        let (rest, decoded) = parse_live(&wire).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_live_energy_frame_round_trip() {
        let frame = sample_frame(Some(EnergyFrame {
            forward_wh: 123_456,
            reverse_wh: 7_890,
        }));
        let wire = encode_live(&frame);
        assert_eq!(wire.len(), LIVE_ENERGY_FRAME_LEN);

        let (rest, decoded) = parse_live_energy(&wire).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_short_input_is_incomplete() {
        let wire = encode_live(&sample_frame(None));
        assert!(matches!(
            parse_live(&wire[..LIVE_FRAME_LEN - 1]),
            Err(nom::Err::Incomplete(_))
        ));
    }

    #[test]
    fn test_split_lines_terminator_handling() {
        let segments = split_lines(b"one\r\ntwo\r\n");
        assert_eq!(segments, vec![&b"one"[..], &b"two"[..], &b""[..]]);

        let segments = split_lines(b"no terminator");
        assert_eq!(segments, vec![&b"no terminator"[..]]);
    }

    #[test]
    fn test_signed_power_applies_export_flag_only() {
        let mut reading = DeviceReading::default();
        reading.apply(&sample_frame(None));

        // Stored magnitudes stay unsigned; only the consumer helper flips.
        assert_eq!(reading.power_w[2], 633);
        assert_eq!(reading.signed_power_w(0), 345);
        assert_eq!(reading.signed_power_w(2), -633);
        assert_eq!(reading.total_signed_power_w(), 345 - 633);
    }

    #[test]
    fn test_energy_fields_are_sticky() {
        let mut reading = DeviceReading::default();
        reading.apply(&sample_frame(Some(EnergyFrame {
            forward_wh: 1000,
            reverse_wh: 50,
        })));
        reading.apply(&sample_frame(None));
        assert_eq!(reading.energy_forward_wh, 1000);
        assert_eq!(reading.energy_reverse_wh, 50);
    }

    #[test]
    fn test_clear_transient_keeps_voltage_and_energy() {
        let mut reading = DeviceReading::default();
        reading.apply(&sample_frame(Some(EnergyFrame {
            forward_wh: 1000,
            reverse_wh: 50,
        })));
        reading.clear_transient();
        assert_eq!(reading.current_ma, [0; 3]);
        assert_eq!(reading.power_w, [0; 3]);
        assert_eq!(reading.voltage_mv, [230_000, 229_500, 231_250]);
        assert_eq!(reading.energy_forward_wh, 1000);
    }

    #[test]
    fn test_identity_display() {
        let ascii = DeviceIdentity::from(*b"MM-0012345A");
        assert_eq!(ascii.to_string(), "MM-0012345A");

        let raw = DeviceIdentity::from([0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A]);
        assert_eq!(raw.to_string(), "000102030405060708090a");
    }
}
