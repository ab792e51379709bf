//! Stream Offset Handling
//!
//! The transport's sequence space is the 32-bit byte offset into the sender's
//! logical stream: a segment's number is the position of its first payload
//! byte, never a packet count. Streams of 2^32 bytes or more are a documented
//! non-goal, so offsets use plain integer ordering with no wraparound
//! arithmetic.

use std::fmt;
use std::ops::{Add, AddAssign};

/// Byte position in the logical stream.
///
/// Cumulative acknowledgments carry the receiver's next expected offset, so
/// an offset also names "everything below this point has been delivered".
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct StreamOffset(u32);

impl StreamOffset {
    /// The start of every stream.
    pub const ZERO: StreamOffset = StreamOffset(0);

    /// Create a new stream offset.
    #[inline]
    pub fn new(value: u32) -> Self {
        StreamOffset(value)
    }

    /// Get the raw offset value.
    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Offset advanced by `len` bytes.
    #[inline]
    pub fn advance(self, len: usize) -> Self {
        StreamOffset(self.0 + len as u32)
    }

    /// Number of bytes between this offset and a later one.
    ///
    /// Returns 0 if `later` is not actually ahead of `self`.
    pub fn gap_to(self, later: StreamOffset) -> usize {
        later.0.saturating_sub(self.0) as usize
    }
}

impl fmt::Debug for StreamOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamOffset({})", self.0)
    }
}

impl fmt::Display for StreamOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StreamOffset {
    fn from(value: u32) -> Self {
        StreamOffset(value)
    }
}

impl From<StreamOffset> for u32 {
    fn from(offset: StreamOffset) -> u32 {
        offset.0
    }
}

impl Add<u32> for StreamOffset {
    type Output = StreamOffset;

    fn add(self, rhs: u32) -> StreamOffset {
        StreamOffset(self.0 + rhs)
    }
}

impl AddAssign<u32> for StreamOffset {
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}
