//! Fault-injecting channel wrapper.
//!
//! Simulates an impaired network on top of any [`DatagramChannel`]: every
//! outbound datagram is either dropped, delivered with exactly one bit
//! flipped, or delivered after a random delay. Delayed deliveries run on
//! independent fire-and-forget threads, so two datagrams sent back to back
//! can arrive in either order — that is the reordering mechanism.
//!
//! All randomness comes from a per-instance seeded ChaCha8 generator, never
//! global state: a given seed reproduces the same impairment schedule
//! byte for byte, and two channels under test stay isolated from each other.

use crate::channel::{ChannelError, ChannelStats, DatagramChannel, StatsSnapshot};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Seed borrowed from the reference harness this simulator reproduces.
pub const DEFAULT_SEED: u64 = 398_120;

/// Impairment model for one channel instance.
///
/// Probabilities are evaluated in order per datagram: drop first, then
/// corruption, then plain (delayed) delivery with the remaining probability.
#[derive(Debug, Clone)]
pub struct FaultProfile {
    /// Probability a datagram is silently discarded.
    pub loss_rate: f64,
    /// Probability one uniformly chosen bit is flipped (evaluated only if
    /// the datagram was not dropped).
    pub corruption_rate: f64,
    /// Delivery delay is drawn uniformly from `[0, max_delivery_delay]`.
    pub max_delivery_delay: Duration,
    /// Fixed pacing applied before every dispatch; bounds peak throughput
    /// and keeps local scheduling from adding its own reordering noise.
    pub pacing: Duration,
    /// PRNG seed; identical seeds give identical runs.
    pub seed: u64,
}

impl Default for FaultProfile {
    fn default() -> Self {
        FaultProfile {
            loss_rate: 0.0,
            corruption_rate: 0.0,
            max_delivery_delay: Duration::ZERO,
            pacing: Duration::from_millis(1),
            seed: DEFAULT_SEED,
        }
    }
}

/// A [`DatagramChannel`] that impairs traffic according to a [`FaultProfile`].
///
/// Owns the packet/byte counters for the link; they increase monotonically
/// and are readable through [`LossyChannel::stats`].
pub struct LossyChannel<C> {
    inner: Arc<C>,
    profile: FaultProfile,
    rng: Mutex<ChaCha8Rng>,
    stats: ChannelStats,
}

impl<C: DatagramChannel + 'static> LossyChannel<C> {
    pub fn new(inner: C, profile: FaultProfile) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(profile.seed);
        LossyChannel {
            inner: Arc::new(inner),
            profile,
            rng: Mutex::new(rng),
            stats: ChannelStats::default(),
        }
    }

    /// Read-only view of the link counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Hand the datagram to an independent delivery timer.
    ///
    /// The timer thread is fire-and-forget; the sender never awaits it, and a
    /// delivery failure after the channel closed is only traced.
    fn dispatch_after(&self, datagram: Vec<u8>, delay: Duration) {
        if delay.is_zero() {
            if let Err(e) = self.inner.send(&datagram) {
                trace!(error = %e, "immediate delivery failed");
            }
            return;
        }

        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            thread::sleep(delay);
            if let Err(e) = inner.send(&datagram) {
                trace!(error = %e, "delayed delivery failed");
            }
        });
    }
}

impl<C: DatagramChannel + 'static> DatagramChannel for LossyChannel<C> {
    fn send(&self, datagram: &[u8]) -> Result<(), ChannelError> {
        let max = self.max_datagram_size();
        if datagram.len() > max {
            return Err(ChannelError::Oversized {
                len: datagram.len(),
                max,
            });
        }

        // Counters reflect what the application asked the link to carry,
        // including datagrams the simulator then drops.
        self.stats.record_send(datagram.len());

        thread::sleep(self.profile.pacing);

        // Exactly one outcome per datagram, drawn under the lock so the
        // sequence of draws is reproducible for a given seed.
        let (corrupt_bit, delay) = {
            let mut rng = self.rng.lock();

            if rng.gen::<f64>() < self.profile.loss_rate {
                debug!(len = datagram.len(), "simulator dropped outgoing datagram");
                return Ok(());
            }

            let corrupt_bit = if !datagram.is_empty()
                && rng.gen::<f64>() < self.profile.corruption_rate
            {
                Some(rng.gen_range(0..datagram.len() * 8))
            } else {
                None
            };

            let delay = self.profile.max_delivery_delay.mul_f64(rng.gen::<f64>());
            (corrupt_bit, delay)
        };

        let mut outgoing = datagram.to_vec();
        if let Some(bit) = corrupt_bit {
            outgoing[bit / 8] ^= 1 << (bit % 8);
            debug!(bit, "simulator flipped one bit in outgoing datagram");
        }

        self.dispatch_after(outgoing, delay);
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, ChannelError> {
        match self.inner.recv_timeout(timeout)? {
            Some(datagram) => {
                self.stats.record_recv(datagram.len());
                Ok(Some(datagram))
            }
            None => Ok(None),
        }
    }

    fn max_datagram_size(&self) -> usize {
        self.inner.max_datagram_size()
    }
}
