//! Sender State Machine
//!
//! Tracks every segment from PENDING (queued, not yet sent) through IN_FLIGHT
//! (sent, awaiting acknowledgment) to released, driving retransmission on
//! timeout. The window holds at most `window` segments in flight; a window of
//! one degenerates to stop-and-wait, which is the minimum correct policy.
//!
//! The window is a pure state machine: it decides *what* to transmit and
//! *when* a segment is overdue, but performs no I/O. The connection layer
//! feeds it clock readings and carries its output to the channel, which keeps
//! retransmission timing fully unit-testable.

use crate::offset::StreamOffset;
use crate::segment::Segment;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Retransmission policy knobs.
#[derive(Debug, Clone)]
pub struct RetransmitPolicy {
    /// Timeout before the first retransmission of a segment.
    pub initial_rto: Duration,
    /// Upper bound for the exponential backoff.
    pub max_rto: Duration,
    /// Retransmissions allowed per segment before the connection is declared
    /// dead. `None` retries forever, which is sound against the simulated
    /// channel (it never loses every copy).
    pub max_retries: Option<u32>,
}

impl Default for RetransmitPolicy {
    fn default() -> Self {
        RetransmitPolicy {
            initial_rto: Duration::from_millis(100),
            max_rto: Duration::from_secs(2),
            max_retries: None,
        }
    }
}

/// A sent segment awaiting its cumulative acknowledgment.
#[derive(Debug, Clone)]
struct Outstanding {
    segment: Segment,
    last_sent: Instant,
    retries: u32,
}

/// Retry budget exceeded for one segment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Segment at offset {offset} unacknowledged after {retries} retransmissions")]
pub struct RetryExhausted {
    pub offset: StreamOffset,
    pub retries: u32,
}

/// Sliding window of pending and in-flight segments.
pub struct SendWindow {
    /// Segments accepted but not yet transmitted.
    pending: VecDeque<Segment>,
    /// Outstanding records keyed by segment offset; removed exactly when the
    /// cumulative ACK reaches the segment's acknowledgment point.
    in_flight: BTreeMap<u32, Outstanding>,
    /// Maximum number of in-flight segments.
    window: usize,
    /// Highest cumulative acknowledgment seen so far.
    acked: StreamOffset,
    policy: RetransmitPolicy,
}

impl SendWindow {
    /// Create a window admitting up to `window` in-flight segments.
    pub fn new(window: usize, policy: RetransmitPolicy) -> Self {
        assert!(window >= 1, "window must admit at least one segment");
        SendWindow {
            pending: VecDeque::new(),
            in_flight: BTreeMap::new(),
            window,
            acked: StreamOffset::ZERO,
            policy,
        }
    }

    /// Queue a segment for transmission.
    pub fn enqueue(&mut self, segment: Segment) {
        self.pending.push_back(segment);
    }

    /// Promote pending segments into the window, stamping their send time.
    ///
    /// Returns the segments the caller must now transmit, in order.
    pub fn fill(&mut self, now: Instant) -> Vec<Segment> {
        let mut to_send = Vec::new();

        while self.in_flight.len() < self.window {
            let Some(segment) = self.pending.pop_front() else {
                break;
            };
            self.in_flight.insert(
                segment.offset.as_raw(),
                Outstanding {
                    segment: segment.clone(),
                    last_sent: now,
                    retries: 0,
                },
            );
            to_send.push(segment);
        }

        to_send
    }

    /// Process a cumulative acknowledgment.
    ///
    /// Releases every in-flight segment whose acknowledgment point is covered
    /// by `ack`. Stale or duplicate ACKs are no-ops. Returns true if any
    /// segment was released.
    pub fn handle_ack(&mut self, ack: StreamOffset) -> bool {
        if ack <= self.acked {
            trace!(%ack, watermark = %self.acked, "stale cumulative ack ignored");
            return false;
        }
        self.acked = ack;

        let before = self.in_flight.len();
        self.in_flight
            .retain(|_, outstanding| outstanding.segment.ack_point() > ack);
        let released = before - self.in_flight.len();

        if released > 0 {
            trace!(%ack, released, "cumulative ack released in-flight segments");
        }
        released > 0
    }

    /// Collect segments whose retransmission timer has expired.
    ///
    /// Each overdue segment is returned unchanged for retransmission, its
    /// retry count bumped and its timer re-armed with capped exponential
    /// backoff. Fails if any segment has exceeded the configured retry cap.
    pub fn due(&mut self, now: Instant) -> Result<Vec<Segment>, RetryExhausted> {
        let mut to_resend = Vec::new();

        for outstanding in self.in_flight.values_mut() {
            let rto = rto_for(&self.policy, outstanding.retries);
            if now.duration_since(outstanding.last_sent) < rto {
                continue;
            }

            if let Some(cap) = self.policy.max_retries {
                if outstanding.retries >= cap {
                    return Err(RetryExhausted {
                        offset: outstanding.segment.offset,
                        retries: outstanding.retries,
                    });
                }
            }

            outstanding.retries += 1;
            outstanding.last_sent = now;
            debug!(
                offset = %outstanding.segment.offset,
                retries = outstanding.retries,
                "retransmission timer expired"
            );
            to_resend.push(outstanding.segment.clone());
        }

        Ok(to_resend)
    }

    /// Highest cumulative acknowledgment received so far.
    pub fn acked(&self) -> StreamOffset {
        self.acked
    }

    /// True once nothing is queued or awaiting acknowledgment.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Number of segments currently in flight.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

/// Exponential backoff: initial RTO doubled per retry, capped at `max_rto`.
fn rto_for(policy: &RetransmitPolicy, retries: u32) -> Duration {
    let backoff = policy
        .initial_rto
        .checked_mul(1u32 << retries.min(16))
        .unwrap_or(policy.max_rto);
    backoff.min(policy.max_rto)
}
