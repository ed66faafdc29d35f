//! Property tests for the frame reader.
//!
//! The load-bearing invariant: however the transport slices a byte
//! stream, the reader delivers exactly the packets that were sent, in
//! order, with identical contents.

use proptest::prelude::*;
use strake_net::{Config, Delivery, FrameReader, Pool};
use strake_proto::Message;

/// Build the wire image of one packet.
fn packet(message_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_message_type(message_type);
    msg.write_bytes(payload).expect("test payloads fit");
    msg.packet().to_vec()
}

/// A reader with a fragment budget loose enough for 1-byte splits.
fn patient_reader() -> FrameReader {
    let config = Config { max_fragments_per_packet: 100_000, ..Config::default() };
    FrameReader::new(Pool::new(8), config)
}

fn collect_into(out: &mut Vec<(u8, Vec<u8>)>) -> impl FnMut(Delivery<'_>) + '_ {
    |mut delivery| {
        let msg = delivery.message();
        out.push((msg.message_type(), msg.payload().to_vec()));
    }
}

fn packets_strategy() -> impl Strategy<Value = Vec<(u8, Vec<u8>)>> {
    prop::collection::vec(
        (any::<u8>(), prop::collection::vec(any::<u8>(), 0..200)),
        1..6,
    )
}

proptest! {
    // Feeding the same stream in arbitrary chunk sizes never changes what
    // comes out.
    #[test]
    fn framing_is_split_invariant(
        packets in packets_strategy(),
        splits in prop::collection::vec(1usize..64, 1..64),
    ) {
        let wire: Vec<u8> =
            packets.iter().flat_map(|(t, p)| packet(*t, p)).collect();

        let mut reader = patient_reader();
        let mut got = Vec::new();
        let mut offset = 0;
        let mut split = splits.iter().cycle();
        while offset < wire.len() {
            let step = split.next().copied().unwrap_or(7).min(wire.len() - offset);
            reader
                .feed(&wire[offset..offset + step], &mut collect_into(&mut got))
                .expect("well-formed stream");
            offset += step;
        }

        prop_assert_eq!(&got, &packets);
    }

    // The degenerate split: one byte per transport read.
    #[test]
    fn framing_survives_one_byte_reads(packets in packets_strategy()) {
        let wire: Vec<u8> =
            packets.iter().flat_map(|(t, p)| packet(*t, p)).collect();

        let mut reader = patient_reader();
        let mut got = Vec::new();
        for byte in wire {
            reader.feed(&[byte], &mut collect_into(&mut got)).expect("well-formed stream");
        }

        prop_assert_eq!(&got, &packets);
    }

    // The opposite degenerate case: every packet coalesced into one read.
    #[test]
    fn coalesced_packets_deliver_one_by_one_in_order(packets in packets_strategy()) {
        let wire: Vec<u8> =
            packets.iter().flat_map(|(t, p)| packet(*t, p)).collect();

        let mut reader = patient_reader();
        let mut got = Vec::new();
        reader.feed(&wire, &mut collect_into(&mut got)).expect("well-formed stream");

        prop_assert_eq!(&got, &packets);
    }

    // Retained messages stay intact while the reader keeps assembling
    // later packets into other buffers.
    #[test]
    fn retained_messages_are_independent(packets in packets_strategy()) {
        let wire: Vec<u8> =
            packets.iter().flat_map(|(t, p)| packet(*t, p)).collect();

        let pool = Pool::new(8);
        let mut reader = FrameReader::new(
            pool.clone(),
            Config { max_fragments_per_packet: 100_000, ..Config::default() },
        );

        let mut kept: Vec<Message> = Vec::new();
        reader
            .feed(&wire, &mut |delivery| kept.push(delivery.retain()))
            .expect("well-formed stream");

        prop_assert_eq!(kept.len(), packets.len());
        for (msg, (t, p)) in kept.iter_mut().zip(&packets) {
            prop_assert_eq!(msg.message_type(), *t);
            prop_assert_eq!(msg.payload(), p.as_slice());
        }

        for msg in kept {
            pool.release(msg);
        }
    }
}

#[test]
fn typed_payload_survives_framing() {
    // A packet built with the typed writers reads back identically after
    // a pass through the reader.
    let mut original = Message::new();
    original.set_message_type(42);
    original.write_u8(7).unwrap();
    original.write_i16(-1234).unwrap();
    original.write_u24(0x00AB_CDEF).unwrap();
    original.write_f64(std::f64::consts::PI).unwrap();
    original.write_str("strake").unwrap();
    let wire = original.packet().to_vec();

    let mut reader = patient_reader();
    let mut checked = false;
    reader
        .feed(&wire, &mut |mut delivery| {
            let msg = delivery.message();
            assert_eq!(msg.message_type(), 42);
            assert_eq!(msg.read_u8().unwrap(), 7);
            assert_eq!(msg.read_i16().unwrap(), -1234);
            assert_eq!(msg.read_u24().unwrap(), 0x00AB_CDEF);
            assert_eq!(msg.read_f64().unwrap(), std::f64::consts::PI);
            assert_eq!(msg.read_string().unwrap(), "strake");
            checked = true;
        })
        .unwrap();
    assert!(checked);
}

#[test]
fn pool_round_trip_yields_a_pristine_buffer() {
    let pool = Pool::<Message>::new(4);

    let mut msg = pool.acquire();
    msg.set_message_type(200);
    msg.write_bytes(&[0xFF; 512]).unwrap();
    pool.release(msg);

    let mut again = pool.acquire();
    assert_eq!(again.message_type(), 0);
    assert_eq!(again.len(), Message::HEADER_SIZE);
    assert_eq!(again.payload_position(), 0);
    assert_eq!(again.packet(), [0x04, 0x00, 0x00, 0x00]);
}
