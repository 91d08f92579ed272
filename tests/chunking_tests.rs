//! Property test: decoding is independent of how the byte stream is split
//! into reads. Feeding a stream byte by byte, in random chunks, or all at
//! once must produce the same final reading and identity.
//!
//! Error report frames are deliberately absent from the generated streams:
//! extracting a report sacrifices the rest of the buffer, so anything queued
//! behind one survives only when it arrives in a later read. That is a known
//! limitation of the wire protocol, not of the decoder.

use modulem_rs::constants::IDENTITY_LEN;
use modulem_rs::link::{encode_live, DeviceIdentity, DeviceReading, EnergyFrame, LinkState, LiveFrame};
use proptest::prelude::*;
use std::time::{Duration, Instant};

fn run_in_chunks(stream: &[u8], cuts: &[usize]) -> (DeviceReading, Option<DeviceIdentity>) {
    let mut link = LinkState::new(Duration::from_secs(3600));
    let now = Instant::now();
    let mut start = 0;
    for &cut in cuts {
        link.feed(&stream[start..cut]);
        link.process(now);
        start = cut;
    }
    link.feed(&stream[start..]);
    link.process(now);
    (*link.reading(), link.identity().copied())
}

/// Noise must not contain the frame marker: marker bytes inside noise could
/// legitimately start a confirmation and change what the stream means.
fn noise_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(
        any::<u8>().prop_map(|b| if b == b'*' { b'+' } else { b }),
        0..8,
    )
}

proptest! {
    #[test]
    fn chunk_size_independence(
        identity in prop::collection::vec(any::<u8>(), IDENTITY_LEN),
        export in prop::array::uniform3(any::<bool>()),
        current_ma in prop::array::uniform3(any::<u32>()),
        voltage_mv in prop::array::uniform3(any::<u32>()),
        power_w in prop::array::uniform3(any::<u32>()),
        forward_wh in any::<u32>(),
        reverse_wh in any::<u32>(),
        noise in noise_strategy(),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
    ) {
        let live = LiveFrame {
            export,
            current_ma,
            voltage_mv,
            power_w,
            energy: None,
        };
        let with_energy = LiveFrame {
            energy: Some(EnergyFrame { forward_wh, reverse_wh }),
            ..live
        };

        let mut stream = noise;
        stream.extend_from_slice(b"*B");
        stream.extend_from_slice(&identity);
        stream.extend_from_slice(&encode_live(&with_energy));
        stream.extend_from_slice(&encode_live(&live));

        let mut cuts: Vec<usize> = cuts.iter().map(|index| index.index(stream.len())).collect();
        cuts.sort_unstable();
        cuts.dedup();

        let chunked = run_in_chunks(&stream, &cuts);
        let byte_by_byte = run_in_chunks(&stream, &(1..stream.len()).collect::<Vec<_>>());
        let one_shot = run_in_chunks(&stream, &[]);

        prop_assert_eq!(chunked, one_shot);
        prop_assert_eq!(byte_by_byte, one_shot);

        // The one-shot result is also the expected decode: the D frame's
        // energy sticks, the trailing C frame provides the live values.
        let (reading, captured) = one_shot;
        prop_assert_eq!(reading.power_w, power_w);
        prop_assert_eq!(reading.energy_forward_wh, forward_wh);
        let captured = captured.unwrap();
        prop_assert_eq!(captured.as_bytes(), &identity[..]);
    }
}
