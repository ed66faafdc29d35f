//! Chunking-equivalence fuzzer for the frame reader.
//!
//! Treats the fuzz input as an arbitrary byte stream plus a chunking
//! schedule, then checks the two invariants that matter:
//!
//! 1. The reader never panics, whatever the stream contains.
//! 2. Chunking is unobservable: feeding the stream in fuzzer-chosen
//!    slices produces exactly the deliveries (and the same terminal
//!    error, if any) as feeding it in one piece.

#![no_main]

use libfuzzer_sys::fuzz_target;
use strake_net::{Config, Delivery, FrameReader, Pool};

fn collect(out: &mut Vec<(u8, Vec<u8>)>) -> impl FnMut(Delivery<'_>) + '_ {
    |mut delivery| {
        let msg = delivery.message();
        out.push((msg.message_type(), msg.payload().to_vec()));
    }
}

fn loose_config() -> Config {
    Config { max_fragments_per_packet: u32::MAX, ..Config::default() }
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First two bytes steer the chunk sizes; the rest is the stream.
    let (seed, stream) = data.split_at(2);
    let step_a = (seed[0] as usize % 37) + 1;
    let step_b = (seed[1] as usize % 7) + 1;

    // Reference: the whole stream in one feed.
    let mut whole = Vec::new();
    let mut reference = FrameReader::new(Pool::new(4), loose_config());
    let reference_err = reference.feed(stream, &mut collect(&mut whole)).is_err();

    // Same stream, alternating fuzzer-chosen chunk sizes.
    let mut chunked = Vec::new();
    let mut reader = FrameReader::new(Pool::new(4), loose_config());
    let mut offset = 0;
    let mut use_a = true;
    let mut chunked_err = false;
    while offset < stream.len() {
        let step = if use_a { step_a } else { step_b }.min(stream.len() - offset);
        use_a = !use_a;
        if reader.feed(&stream[offset..offset + step], &mut collect(&mut chunked)).is_err() {
            chunked_err = true;
            break;
        }
        offset += step;
    }

    assert_eq!(reference_err, chunked_err, "error outcome depends on chunking");
    assert_eq!(whole, chunked, "deliveries depend on chunking");

    // Every delivered packet is structurally sound.
    for (_, payload) in &whole {
        assert!(payload.len() + 4 <= strake_proto::FrameHeader::MAX_PACKET_SIZE);
    }
});
