//! Transport Protocol Core Implementation
//!
//! This crate implements the reliable byte-stream protocol itself: segment
//! wire format, byte-offset sequence space, segmentation, the retransmitting
//! send window, and receiver-side reassembly. Everything here is pure state —
//! I/O and timing live in `streamer-net` and `streamer`.

pub mod offset;
pub mod receiver;
pub mod segment;
pub mod segmenter;
pub mod sender;

pub use offset::StreamOffset;
pub use receiver::{Arrival, Reassembler};
pub use segment::{
    Segment, SegmentError, SegmentKind, HEADER_SIZE, MAX_DATAGRAM_SIZE, MAX_PAYLOAD_SIZE,
};
pub use segmenter::Segmenter;
pub use sender::{RetransmitPolicy, RetryExhausted, SendWindow};
