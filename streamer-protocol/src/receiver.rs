//! Receiver-side reassembly and acknowledgment generation.
//!
//! The reassembler turns arriving segments back into the exact byte stream:
//! in-order payloads append straight to the ready queue, early arrivals park
//! in the reorder buffer until the gap before them fills, and duplicates are
//! discarded by the offset comparison alone. Every arrival produces a
//! cumulative acknowledgment for the current `next_expected` offset, so a
//! peer that missed an earlier ACK can always advance.

use crate::offset::StreamOffset;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use tracing::trace;

/// Outcome of accepting one segment, for the caller to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrival {
    /// Cumulative acknowledgment to emit back to the peer.
    pub ack: StreamOffset,
    /// Bytes that became newly deliverable to the application.
    pub delivered: usize,
    /// True once the peer's FIN has been consumed by the cursor.
    pub finished: bool,
}

/// Reorder buffer plus delivery cursor for one incoming stream.
pub struct Reassembler {
    /// Next contiguous byte offset the stream cursor expects.
    next_expected: StreamOffset,
    /// Early arrivals keyed by offset; at most one entry per offset, merged
    /// and removed the instant the cursor reaches them.
    out_of_order: BTreeMap<u32, Bytes>,
    /// Contiguous bytes delivered but not yet read by the application.
    ready: BytesMut,
    /// Stream end announced by a FIN that arrived ahead of a gap.
    pending_fin: Option<StreamOffset>,
    /// Set once the FIN's sequence slot has been consumed.
    finished: bool,
}

impl Reassembler {
    pub fn new() -> Self {
        Reassembler {
            next_expected: StreamOffset::ZERO,
            out_of_order: BTreeMap::new(),
            ready: BytesMut::new(),
            pending_fin: None,
            finished: false,
        }
    }

    /// Accept an arriving data segment.
    pub fn accept_data(&mut self, offset: StreamOffset, payload: Bytes) -> Arrival {
        if offset < self.next_expected {
            // Duplicate of already-delivered data; the original ACK was
            // probably lost. Re-acknowledge so the peer can advance.
            trace!(%offset, expected = %self.next_expected, "duplicate segment discarded");
            return self.arrival(0);
        }

        if offset > self.next_expected {
            // Ahead of a gap: park it, but never overwrite an existing entry.
            self.out_of_order.entry(offset.as_raw()).or_insert(payload);
            trace!(%offset, expected = %self.next_expected, "segment buffered ahead of gap");
            return self.arrival(0);
        }

        // Contiguous: deliver, then merge any buffered run that follows.
        let mut delivered = payload.len();
        self.ready.extend_from_slice(&payload);
        self.next_expected = self.next_expected.advance(payload.len());
        delivered += self.merge_contiguous();
        self.consume_fin();

        self.arrival(delivered)
    }

    /// Accept an arriving FIN marking `offset` as the logical stream end.
    pub fn accept_fin(&mut self, offset: StreamOffset) -> Arrival {
        if offset < self.next_expected {
            // Retransmitted FIN whose slot was already consumed.
            return self.arrival(0);
        }

        self.pending_fin = Some(offset);
        self.consume_fin();
        self.arrival(0)
    }

    /// Drain the longest currently-deliverable contiguous byte range.
    pub fn take_ready(&mut self) -> Option<Bytes> {
        if self.ready.is_empty() {
            return None;
        }
        Some(self.ready.split().freeze())
    }

    /// Next contiguous byte offset the cursor expects.
    pub fn next_expected(&self) -> StreamOffset {
        self.next_expected
    }

    /// True once the peer's FIN slot has been consumed; no further data will
    /// arrive.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Merge buffered entries that have become contiguous with the cursor.
    fn merge_contiguous(&mut self) -> usize {
        let mut merged = 0;

        while let Some(payload) = self.out_of_order.remove(&self.next_expected.as_raw()) {
            merged += payload.len();
            self.ready.extend_from_slice(&payload);
            self.next_expected = self.next_expected.advance(payload.len());
        }

        if merged > 0 {
            trace!(expected = %self.next_expected, merged, "reorder buffer drained into stream");
        }
        merged
    }

    /// Consume the FIN slot once the cursor has reached the stream end.
    fn consume_fin(&mut self) {
        if self.pending_fin == Some(self.next_expected) {
            self.next_expected = self.next_expected.advance(1);
            self.pending_fin = None;
            self.finished = true;
        }
    }

    fn arrival(&self, delivered: usize) -> Arrival {
        Arrival {
            ack: self.next_expected,
            delivered,
            finished: self.finished,
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
