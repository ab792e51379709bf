//! Segment Structures and Serialization
//!
//! This module implements the transport's wire format: a fixed 7-byte header
//! followed by optional payload data. Segments carry data, cumulative
//! acknowledgments, or the FIN teardown marker, distinguished by the kind
//! byte.
//!
//! # Wire format
//!
//! All multi-byte integers are big-endian.
//!
//! ```text
//! offset (u32) | kind (u8) | checksum (u16) | payload...
//! ```
//!
//! The checksum is the RFC 1071 internet checksum computed over the entire
//! datagram with the checksum field zeroed. The simulated network flips bits
//! in transit; a segment whose checksum does not verify is indistinguishable
//! from a lost one and must be silently discarded so retransmission can
//! recover it.

use crate::offset::StreamOffset;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the segment header in bytes: offset (4) + kind (1) + checksum (2).
pub const HEADER_SIZE: usize = 7;

/// Maximum datagram size the underlying network will carry
/// (1500 MTU - 20 IP - 8 UDP).
pub const MAX_DATAGRAM_SIZE: usize = 1472;

/// Maximum payload size for a single data segment.
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

/// Segment kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentKind {
    /// Carries payload bytes at `offset` in the stream.
    Data = 1,
    /// Cumulative acknowledgment; `offset` is the next byte the receiver
    /// expects, implicitly confirming everything before it.
    Ack = 2,
    /// Stream teardown; `offset` is the logical end of the stream.
    Fin = 3,
}

impl SegmentKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(SegmentKind::Data),
            2 => Some(SegmentKind::Ack),
            3 => Some(SegmentKind::Fin),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single transport segment: header fields plus optional payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Segment kind.
    pub kind: SegmentKind,
    /// Byte position of `payload[0]` in the sender's stream (DATA), the
    /// cumulative acknowledgment point (ACK), or the stream end (FIN).
    pub offset: StreamOffset,
    /// Payload bytes; always empty for ACK and FIN.
    pub payload: Bytes,
}

impl Segment {
    /// Create a data segment carrying `payload` at `offset`.
    pub fn data(offset: StreamOffset, payload: Bytes) -> Self {
        Segment {
            kind: SegmentKind::Data,
            offset,
            payload,
        }
    }

    /// Create a cumulative acknowledgment for everything below `offset`.
    pub fn ack(offset: StreamOffset) -> Self {
        Segment {
            kind: SegmentKind::Ack,
            offset,
            payload: Bytes::new(),
        }
    }

    /// Create a FIN segment marking `offset` as the logical stream end.
    pub fn fin(offset: StreamOffset) -> Self {
        Segment {
            kind: SegmentKind::Fin,
            offset,
            payload: Bytes::new(),
        }
    }

    /// The cumulative acknowledgment that confirms this segment.
    ///
    /// A data segment is confirmed once the peer expects the byte after its
    /// payload. A FIN occupies one position in sequence space so that the
    /// same cumulative machinery covers teardown.
    pub fn ack_point(&self) -> StreamOffset {
        match self.kind {
            SegmentKind::Data => self.offset.advance(self.payload.len()),
            SegmentKind::Fin => self.offset.advance(1),
            SegmentKind::Ack => self.offset,
        }
    }

    /// Total size of the segment on the wire (header + payload).
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize the segment to bytes, computing the checksum last.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u32(self.offset.as_raw());
        buf.put_u8(self.kind.as_u8());
        // Checksum field is zero while the checksum is computed.
        buf.put_u16(0);
        buf.put_slice(&self.payload);

        let checksum = internet_checksum(&buf);
        buf[5..7].copy_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Parse a segment from a raw datagram, verifying the checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self, SegmentError> {
        if bytes.len() < HEADER_SIZE {
            return Err(SegmentError::InsufficientData {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut scratch = bytes.to_vec();
        let stored = u16::from_be_bytes([scratch[5], scratch[6]]);
        scratch[5] = 0;
        scratch[6] = 0;
        if internet_checksum(&scratch) != stored {
            return Err(SegmentError::ChecksumMismatch);
        }

        let mut buf = bytes;
        let offset = StreamOffset::new(buf.get_u32());
        let kind_byte = buf.get_u8();
        let kind = SegmentKind::from_u8(kind_byte)
            .ok_or(SegmentError::InvalidKind(kind_byte))?;
        buf.advance(2); // checksum, already verified

        let payload = if buf.has_remaining() {
            Bytes::copy_from_slice(buf)
        } else {
            Bytes::new()
        };

        if !payload.is_empty() && kind != SegmentKind::Data {
            return Err(SegmentError::UnexpectedPayload(kind));
        }

        Ok(Segment {
            kind,
            offset,
            payload,
        })
    }
}

/// Compute the RFC 1071 internet checksum over `data`.
///
/// Sums consecutive big-endian 16-bit words, folds the carry, and returns the
/// one's complement. Any checksum field inside `data` must already be zeroed.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [trailing] = chunks.remainder() {
        sum += u32::from(*trailing) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// Segment parsing and validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SegmentError {
    #[error("Insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Checksum verification failed")]
    ChecksumMismatch,

    #[error("Invalid segment kind: {0}")]
    InvalidKind(u8),

    #[error("Unexpected payload on {0:?} segment")]
    UnexpectedPayload(SegmentKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_kind_roundtrip() {
        for kind in [SegmentKind::Data, SegmentKind::Ack, SegmentKind::Fin] {
            assert_eq!(SegmentKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(SegmentKind::from_u8(0), None);
        assert_eq!(SegmentKind::from_u8(77), None);
    }

    #[test]
    fn test_data_segment_roundtrip() {
        let segment = Segment::data(StreamOffset::new(1000), Bytes::from_static(b"hello"));
        let bytes = segment.encode();

        let decoded = Segment::decode(&bytes).unwrap();
        assert_eq!(decoded, segment);
        assert_eq!(bytes.len(), HEADER_SIZE + 5);
    }

    #[test]
    fn test_ack_segment_roundtrip() {
        let segment = Segment::ack(StreamOffset::new(4096));
        let decoded = Segment::decode(&segment.encode()).unwrap();

        assert_eq!(decoded.kind, SegmentKind::Ack);
        assert_eq!(decoded.offset.as_raw(), 4096);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_offset_big_endian_on_wire() {
        let bytes = Segment::ack(StreamOffset::new(0x0102_0304)).encode();
        assert_eq!(&bytes[..4], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_ack_point() {
        let data = Segment::data(StreamOffset::new(100), Bytes::from_static(b"1234"));
        assert_eq!(data.ack_point().as_raw(), 104);

        let fin = Segment::fin(StreamOffset::new(200));
        assert_eq!(fin.ack_point().as_raw(), 201);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert_eq!(
            Segment::decode(&[0u8; HEADER_SIZE - 1]),
            Err(SegmentError::InsufficientData {
                expected: HEADER_SIZE,
                actual: HEADER_SIZE - 1,
            })
        );
    }

    #[test]
    fn test_single_bit_flip_detected() {
        let segment = Segment::data(StreamOffset::new(500), Bytes::from_static(b"payload"));
        let encoded = segment.encode();

        // Flip every bit position in turn; the checksum must catch each one.
        for bit in 0..encoded.len() * 8 {
            let mut corrupted = encoded.to_vec();
            corrupted[bit / 8] ^= 1 << (bit % 8);
            assert_eq!(
                Segment::decode(&corrupted),
                Err(SegmentError::ChecksumMismatch),
                "bit {} flip went undetected",
                bit
            );
        }
    }

    #[test]
    fn test_payload_on_ack_rejected() {
        // Hand-build an ACK datagram that illegally carries payload.
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.put_u8(SegmentKind::Ack.as_u8());
        buf.put_u16(0);
        buf.put_slice(b"bogus");
        let checksum = internet_checksum(&buf);
        buf[5..7].copy_from_slice(&checksum.to_be_bytes());

        assert_eq!(
            Segment::decode(&buf),
            Err(SegmentError::UnexpectedPayload(SegmentKind::Ack))
        );
    }

    #[test]
    fn test_max_payload_fits_mtu() {
        let payload = Bytes::from(vec![0xAB; MAX_PAYLOAD_SIZE]);
        let segment = Segment::data(StreamOffset::ZERO, payload);
        assert_eq!(segment.encode().len(), MAX_DATAGRAM_SIZE);
    }

    #[test]
    fn test_internet_checksum_odd_length() {
        // Odd trailing byte is padded with zero on the right.
        let even = internet_checksum(&[0x12, 0x34, 0x56, 0x00]);
        let odd = internet_checksum(&[0x12, 0x34, 0x56]);
        assert_eq!(even, odd);
    }
}
