//! Cross-module protocol tests.
//!
//! Drives the sender and receiver state machines directly against each other,
//! with the test standing in for both the network and the clock. Every
//! segment still crosses the wire format: encode on the way out, decode on
//! the way in.

use bytes::Bytes;
use std::time::{Duration, Instant};
use streamer_protocol::{
    Reassembler, RetransmitPolicy, Segment, SegmentKind, Segmenter, SendWindow, StreamOffset,
    MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE,
};

/// Pass a segment over the "wire".
fn transfer(segment: &Segment) -> Segment {
    Segment::decode(&segment.encode()).expect("uncorrupted segment must decode")
}

#[test]
fn test_sender_and_receiver_converse_to_completion() {
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();

    let mut segmenter = Segmenter::new(64);
    let mut window = SendWindow::new(4, RetransmitPolicy::default());
    let mut reassembler = Reassembler::new();
    let mut received = Vec::new();

    for segment in segmenter.split(&data) {
        window.enqueue(segment);
    }

    let now = Instant::now();
    while !window.is_drained() {
        for segment in window.fill(now) {
            let segment = transfer(&segment);
            let arrival = reassembler.accept_data(segment.offset, segment.payload);
            window.handle_ack(transfer(&Segment::ack(arrival.ack)).offset);
        }
        if let Some(bytes) = reassembler.take_ready() {
            received.extend_from_slice(&bytes);
        }
    }

    assert_eq!(received, data);
    assert_eq!(window.acked(), segmenter.cursor());
}

#[test]
fn test_mtu_boundary_segment_counts() {
    let mut segmenter = Segmenter::new(MAX_PAYLOAD_SIZE);
    let exact = segmenter.split(&vec![0xAB; MAX_PAYLOAD_SIZE]);
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].encode().len(), MAX_DATAGRAM_SIZE);

    let over = segmenter.split(&vec![0xCD; MAX_PAYLOAD_SIZE + 1]);
    assert_eq!(over.len(), 2);
    assert_eq!(over[0].payload.len(), MAX_PAYLOAD_SIZE);
    assert_eq!(over[1].payload.len(), 1);
}

#[test]
fn test_lost_ack_recovered_by_duplicate_data() {
    let policy = RetransmitPolicy {
        initial_rto: Duration::from_millis(50),
        ..RetransmitPolicy::default()
    };
    let mut window = SendWindow::new(4, policy);
    let mut reassembler = Reassembler::new();

    window.enqueue(Segment::data(StreamOffset::ZERO, Bytes::from_static(b"once")));
    let sent_at = Instant::now();
    let first = window.fill(sent_at);
    assert_eq!(first.len(), 1);

    // Delivered, but the ACK is lost in transit.
    let arrival = reassembler.accept_data(first[0].offset, first[0].payload.clone());
    assert_eq!(arrival.delivered, 4);

    // The retransmission timer fires and the duplicate arrives.
    let dup = window
        .due(sent_at + Duration::from_millis(60))
        .unwrap()
        .remove(0);
    let replay = reassembler.accept_data(dup.offset, dup.payload);

    // Nothing new is delivered, but the re-ACK releases the sender.
    assert_eq!(replay.delivered, 0);
    assert_eq!(replay.ack, StreamOffset::new(4));
    assert!(window.handle_ack(replay.ack));
    assert!(window.is_drained());

    assert_eq!(&reassembler.take_ready().unwrap()[..], b"once");
    assert!(reassembler.take_ready().is_none());
}

#[test]
fn test_out_of_order_wire_delivery_reassembles() {
    let data = b"segments can arrive in any order at all";
    let mut segmenter = Segmenter::new(10);
    let segments = segmenter.split(data);
    assert_eq!(segments.len(), 4);

    let mut reassembler = Reassembler::new();
    let mut last_ack = StreamOffset::ZERO;
    for index in [2, 0, 3, 1] {
        let segment = transfer(&segments[index]);
        last_ack = reassembler.accept_data(segment.offset, segment.payload).ack;
    }

    assert_eq!(last_ack, segmenter.cursor());
    assert_eq!(&reassembler.take_ready().unwrap()[..], data);
}

#[test]
fn test_fin_teardown_handshake() {
    let mut segmenter = Segmenter::new(32);
    let mut window = SendWindow::new(4, RetransmitPolicy::default());
    let mut reassembler = Reassembler::new();

    for segment in segmenter.split(b"goodbye") {
        window.enqueue(segment);
    }
    window.enqueue(segmenter.split_fin());

    let mut last_ack = StreamOffset::ZERO;
    for segment in window.fill(Instant::now()) {
        let segment = transfer(&segment);
        let arrival = match segment.kind {
            SegmentKind::Fin => reassembler.accept_fin(segment.offset),
            _ => reassembler.accept_data(segment.offset, segment.payload),
        };
        last_ack = arrival.ack;
    }

    assert!(reassembler.is_finished());
    assert_eq!(last_ack, segmenter.cursor());
    window.handle_ack(last_ack);
    assert!(window.is_drained());
    assert_eq!(&reassembler.take_ready().unwrap()[..], b"goodbye");
}

#[test]
fn test_fin_ahead_of_gap_waits_for_data() {
    let mut reassembler = Reassembler::new();

    // FIN for a 5-byte stream arrives before the data does.
    let early = reassembler.accept_fin(StreamOffset::new(5));
    assert!(!early.finished);
    assert_eq!(early.ack, StreamOffset::ZERO);

    // The missing data closes the gap; the FIN slot is consumed with it.
    let arrival = reassembler.accept_data(StreamOffset::ZERO, Bytes::from_static(b"hello"));
    assert!(arrival.finished);
    assert_eq!(arrival.ack, StreamOffset::new(6));
    assert!(reassembler.is_finished());
}
