//! Datagram channel abstraction.
//!
//! The transport never talks to a socket type directly; it composes over a
//! narrow [`DatagramChannel`] capability so the same connection code runs
//! over a real UDP socket in production and over the fault-injecting or
//! in-memory channels in tests.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Largest datagram the underlying network will carry
/// (1500 MTU - 20 IP - 8 UDP).
pub const MAX_DATAGRAM_SIZE: usize = 1472;

/// Channel errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Datagram of {len} bytes exceeds the channel maximum of {max}")]
    Oversized { len: usize, max: usize },

    #[error("Channel closed by peer")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Point-to-point datagram send/receive capability.
///
/// Implementations must deliver datagrams whole or not at all: a receive
/// never returns a torn or partially read datagram, and transient
/// interruptions are retried internally rather than surfaced.
pub trait DatagramChannel: Send + Sync {
    /// Send one datagram to the peer.
    ///
    /// Fails fast with [`ChannelError::Oversized`] before any transmission
    /// attempt if the datagram exceeds [`DatagramChannel::max_datagram_size`].
    fn send(&self, datagram: &[u8]) -> Result<(), ChannelError>;

    /// Wait up to `timeout` for one complete datagram.
    ///
    /// Returns `Ok(None)` on timeout so callers can poll a shutdown flag
    /// between waits.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, ChannelError>;

    /// Block until one complete datagram arrives.
    fn recv(&self) -> Result<Vec<u8>, ChannelError> {
        loop {
            if let Some(datagram) = self.recv_timeout(Duration::from_secs(1))? {
                return Ok(datagram);
            }
        }
    }

    /// Largest datagram this channel will accept.
    fn max_datagram_size(&self) -> usize {
        MAX_DATAGRAM_SIZE
    }
}

/// Monotonic packet/byte counters.
///
/// Owned by the fault-injecting channel; read-only to every other component
/// and not required for correctness.
#[derive(Debug, Default)]
pub struct ChannelStats {
    packets_sent: AtomicU64,
    packets_recv: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_recv: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

impl ChannelStats {
    pub fn record_send(&self, len: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_recv(&self, len: usize) {
        self.packets_recv.fetch_add(1, Ordering::Relaxed);
        self.bytes_recv.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_recv: self.packets_recv.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_recv: self.bytes_recv.load(Ordering::Relaxed),
        }
    }
}

/// In-process datagram link for tests.
///
/// A pair of endpoints connected by unbounded crossbeam channels. Each send
/// delivers one whole datagram to the peer's receive queue; no faults are
/// applied here, so tests wrap each endpoint in a fault-injecting channel
/// when impairments are wanted.
pub struct MemoryChannel {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl MemoryChannel {
    /// Create two connected endpoints.
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (a_tx, a_rx) = channel::unbounded();
        let (b_tx, b_rx) = channel::unbounded();

        (
            MemoryChannel { tx: b_tx, rx: a_rx },
            MemoryChannel { tx: a_tx, rx: b_rx },
        )
    }
}

impl DatagramChannel for MemoryChannel {
    fn send(&self, datagram: &[u8]) -> Result<(), ChannelError> {
        if datagram.len() > self.max_datagram_size() {
            return Err(ChannelError::Oversized {
                len: datagram.len(),
                max: self.max_datagram_size(),
            });
        }
        self.tx
            .send(datagram.to_vec())
            .map_err(|_| ChannelError::Closed)
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, ChannelError> {
        match self.rx.recv_timeout(timeout) {
            Ok(datagram) => Ok(Some(datagram)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pair_delivers_whole_datagrams() {
        let (a, b) = MemoryChannel::pair();

        a.send(b"hello").unwrap();
        a.send(b"world").unwrap();

        assert_eq!(b.recv().unwrap(), b"hello");
        assert_eq!(b.recv().unwrap(), b"world");
    }

    #[test]
    fn test_memory_pair_is_bidirectional() {
        let (a, b) = MemoryChannel::pair();

        a.send(b"ping").unwrap();
        b.send(b"pong").unwrap();

        assert_eq!(b.recv().unwrap(), b"ping");
        assert_eq!(a.recv().unwrap(), b"pong");
    }

    #[test]
    fn test_recv_timeout_returns_none_when_idle() {
        let (a, _b) = MemoryChannel::pair();
        let got = a.recv_timeout(Duration::from_millis(10)).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_oversized_send_rejected() {
        let (a, _b) = MemoryChannel::pair();
        let huge = vec![0u8; MAX_DATAGRAM_SIZE + 1];

        match a.send(&huge) {
            Err(ChannelError::Oversized { len, max }) => {
                assert_eq!(len, MAX_DATAGRAM_SIZE + 1);
                assert_eq!(max, MAX_DATAGRAM_SIZE);
            }
            other => panic!("expected Oversized, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_send_to_dropped_peer_is_closed() {
        let (a, b) = MemoryChannel::pair();
        drop(b);
        assert!(matches!(a.send(b"x"), Err(ChannelError::Closed)));
    }

    #[test]
    fn test_stats_counters_accumulate() {
        let stats = ChannelStats::default();
        stats.record_send(100);
        stats.record_send(50);
        stats.record_recv(100);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_sent, 2);
        assert_eq!(snapshot.bytes_sent, 150);
        assert_eq!(snapshot.packets_recv, 1);
        assert_eq!(snapshot.bytes_recv, 100);
    }
}
