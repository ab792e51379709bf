//! Splitting application buffers into MTU-bounded segments.
//!
//! The segmenter owns the sender's stream cursor: every byte handed to
//! [`Segmenter::split`] is assigned the next offset in the logical stream,
//! monotonically across calls. A segment is never re-split once produced;
//! retransmission always resends the original segment unchanged.

use crate::offset::StreamOffset;
use crate::segment::{Segment, MAX_PAYLOAD_SIZE};
use bytes::Bytes;

/// Stateful splitter producing data segments from the current stream offset
/// forward.
pub struct Segmenter {
    /// Offset the next produced byte will occupy.
    cursor: StreamOffset,
    /// Maximum payload bytes per segment (MTU minus header).
    max_payload: usize,
}

impl Segmenter {
    /// Create a segmenter starting at offset zero with the given payload
    /// bound.
    pub fn new(max_payload: usize) -> Self {
        assert!(max_payload > 0 && max_payload <= MAX_PAYLOAD_SIZE);
        Segmenter {
            cursor: StreamOffset::ZERO,
            max_payload,
        }
    }

    /// Split `data` into data segments of at most `max_payload` bytes each,
    /// consuming stream offsets from the cursor forward.
    ///
    /// Returns a finite, ordered sequence; empty input produces no segments.
    pub fn split(&mut self, data: &[u8]) -> Vec<Segment> {
        let mut segments = Vec::with_capacity((data.len() + self.max_payload - 1) / self.max_payload);

        for chunk in data.chunks(self.max_payload) {
            let segment = Segment::data(self.cursor, Bytes::copy_from_slice(chunk));
            self.cursor = self.cursor.advance(chunk.len());
            segments.push(segment);
        }

        segments
    }

    /// Produce the FIN segment marking the current cursor as the stream end.
    ///
    /// The FIN consumes one position in sequence space so the cumulative
    /// acknowledgment machinery confirms teardown like any data segment.
    pub fn split_fin(&mut self) -> Segment {
        let segment = Segment::fin(self.cursor);
        self.cursor = self.cursor.advance(1);
        segment
    }

    /// The offset the next produced byte will occupy.
    pub fn cursor(&self) -> StreamOffset {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_produces_no_segments() {
        let mut segmenter = Segmenter::new(100);
        assert!(segmenter.split(&[]).is_empty());
        assert_eq!(segmenter.cursor(), StreamOffset::ZERO);
    }

    #[test]
    fn test_exact_fit_is_one_segment() {
        let mut segmenter = Segmenter::new(100);
        let segments = segmenter.split(&[0u8; 100]);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].offset, StreamOffset::ZERO);
        assert_eq!(segments[0].payload.len(), 100);
    }

    #[test]
    fn test_one_byte_over_is_two_segments() {
        let mut segmenter = Segmenter::new(100);
        let segments = segmenter.split(&[0u8; 101]);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].payload.len(), 100);
        assert_eq!(segments[1].offset, StreamOffset::new(100));
        assert_eq!(segments[1].payload.len(), 1);
    }

    #[test]
    fn test_cursor_persists_across_calls() {
        let mut segmenter = Segmenter::new(10);

        let first = segmenter.split(b"0123456789abcde");
        assert_eq!(first.len(), 2);

        let second = segmenter.split(b"xyz");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].offset, StreamOffset::new(15));
        assert_eq!(segmenter.cursor(), StreamOffset::new(18));
    }

    #[test]
    fn test_offsets_cover_stream_contiguously() {
        let mut segmenter = Segmenter::new(7);
        let data = b"the quick brown fox jumps over the lazy dog";
        let segments = segmenter.split(data);

        let mut expected = StreamOffset::ZERO;
        for segment in &segments {
            assert_eq!(segment.offset, expected);
            expected = expected.advance(segment.payload.len());
        }
        assert_eq!(expected.as_raw() as usize, data.len());
    }

    #[test]
    fn test_fin_takes_one_sequence_slot() {
        let mut segmenter = Segmenter::new(10);
        segmenter.split(b"hello");

        let fin = segmenter.split_fin();
        assert_eq!(fin.offset, StreamOffset::new(5));
        assert_eq!(segmenter.cursor(), StreamOffset::new(6));
    }
}
