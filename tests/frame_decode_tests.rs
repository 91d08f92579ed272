//! Unit tests for frame decoding against the resynchronization buffer:
//! dispatch on the command byte, exact consume counts, and the
//! insufficient-data deferrals.

use modulem_rs::constants::LIVE_FRAME_LEN;
use modulem_rs::link::{
    decode_frame, encode_live, DecodeOutcome, EnergyFrame, LiveFrame, ResyncBuffer,
};

fn live_frame() -> LiveFrame {
    LiveFrame {
        export: [false, false, true],
        current_ma: [1500, 820, 2750],
        voltage_mv: [230_000, 229_500, 231_250],
        power_w: [345, 188, 633],
        energy: None,
    }
}

fn energy_frame() -> LiveFrame {
    LiveFrame {
        energy: Some(EnergyFrame {
            forward_wh: 1_234_567,
            reverse_wh: 89_012,
        }),
        ..live_frame()
    }
}

/// Leading garbage is trimmed, then a valid `C` frame decodes.
#[test]
fn test_garbage_prefix_then_live_frame() {
    let mut buffer = ResyncBuffer::new();
    buffer.write(&[0x05, 0x07]);
    buffer.write(&encode_live(&live_frame()));

    assert_eq!(buffer.trim_to_marker(), 2);
    let outcome = decode_frame(&mut buffer);
    assert_eq!(outcome, DecodeOutcome::Reading(live_frame()));
    assert!(buffer.is_empty());
}

/// A short `C` frame consumes nothing; the remainder decodes once fed.
#[test]
fn test_incomplete_live_frame_defers() {
    let wire = encode_live(&live_frame());
    let mut buffer = ResyncBuffer::new();
    buffer.write(&wire[..LIVE_FRAME_LEN - 5]);

    assert_eq!(decode_frame(&mut buffer), DecodeOutcome::Incomplete);
    assert_eq!(buffer.len(), LIVE_FRAME_LEN - 5);

    buffer.write(&wire[LIVE_FRAME_LEN - 5..]);
    assert_eq!(decode_frame(&mut buffer), DecodeOutcome::Reading(live_frame()));
}

/// A `D` frame consumes its full 49 bytes, leaving any queued frame intact.
#[test]
fn test_energy_frame_consumes_full_length() {
    let mut buffer = ResyncBuffer::new();
    buffer.write(&encode_live(&energy_frame()));
    buffer.write(&encode_live(&live_frame()));

    assert_eq!(decode_frame(&mut buffer), DecodeOutcome::Reading(energy_frame()));
    assert_eq!(buffer.len(), LIVE_FRAME_LEN);
    assert_eq!(decode_frame(&mut buffer), DecodeOutcome::Reading(live_frame()));
}

/// Unknown commands lose their two header bytes and nothing else.
#[test]
fn test_unrecognized_command_consumes_header() {
    let mut buffer = ResyncBuffer::new();
    buffer.write(b"*Zrest");

    assert_eq!(decode_frame(&mut buffer), DecodeOutcome::Unrecognized(b'Z'));
    assert_eq!(buffer.as_slice(), b"rest");
}

/// Zero-line error report: clears, consumes exactly 3 bytes, tail intact.
#[test]
fn test_zero_line_error_report() {
    let mut buffer = ResyncBuffer::new();
    buffer.write(b"*E\x00");
    buffer.write(&encode_live(&live_frame()));

    assert_eq!(decode_frame(&mut buffer), DecodeOutcome::ErrorsCleared);
    assert_eq!(buffer.len(), LIVE_FRAME_LEN);
    assert_eq!(decode_frame(&mut buffer), DecodeOutcome::Reading(live_frame()));
}

/// Error report with lines: header stripped from the first line, the
/// declared number of lines extracted, and the whole buffer sacrificed.
#[test]
fn test_error_report_lines_and_buffer_sacrifice() {
    let mut buffer = ResyncBuffer::new();
    buffer.write(b"*E\x02CT2 open circuit\r\nsupply undervoltage\r\n");
    // A queued frame after the error block is lost; the protocol has no
    // frame-end delimiter for error reports.
    buffer.write(&encode_live(&live_frame()));

    let outcome = decode_frame(&mut buffer);
    assert_eq!(
        outcome,
        DecodeOutcome::Errors(vec![
            "CT2 open circuit".to_string(),
            "supply undervoltage".to_string(),
        ])
    );
    assert!(buffer.is_empty());
}

/// Fewer terminated lines than declared: wait without consuming.
#[test]
fn test_error_report_waits_for_declared_lines() {
    let mut buffer = ResyncBuffer::new();
    buffer.write(b"*E\x03only one line\r\n");

    assert_eq!(decode_frame(&mut buffer), DecodeOutcome::Incomplete);
    assert_eq!(buffer.len(), b"*E\x03only one line\r\n".len());

    // An unterminated trailing line does not count toward the total.
    buffer.write(b"two\r\nthr");
    assert_eq!(decode_frame(&mut buffer), DecodeOutcome::Incomplete);

    buffer.write(b"ee\r\n");
    assert_eq!(
        decode_frame(&mut buffer),
        DecodeOutcome::Errors(vec![
            "only one line".to_string(),
            "two".to_string(),
            "three".to_string(),
        ])
    );
}

/// A bare error header is not enough to dispatch on.
#[test]
fn test_error_header_incomplete() {
    let mut buffer = ResyncBuffer::new();
    buffer.write(b"*E");
    assert_eq!(decode_frame(&mut buffer), DecodeOutcome::Incomplete);
    assert_eq!(buffer.len(), 2);
}
