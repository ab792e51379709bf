//! Transport configuration.

use std::time::Duration;

/// Tunables for one connection.
///
/// The defaults suit the simulated-network test environment; every field can
/// be overridden by constructing the struct directly.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum datagram size budget; the effective bound is the smaller of
    /// this and what the channel will carry.
    pub mtu: usize,
    /// Maximum segments in flight. A window of 1 is stop-and-wait.
    pub window: usize,
    /// Timeout before the first retransmission of a segment.
    pub initial_rto: Duration,
    /// Cap for the exponential retransmission backoff.
    pub max_rto: Duration,
    /// Retransmissions allowed per segment before the connection is declared
    /// dead; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Cadence of the background receive poll and retransmission check.
    pub tick: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            mtu: streamer_net::MAX_DATAGRAM_SIZE,
            window: 16,
            initial_rto: Duration::from_millis(100),
            max_rto: Duration::from_secs(2),
            max_retries: None,
            tick: Duration::from_millis(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamer_protocol::segment::HEADER_SIZE;

    #[test]
    fn test_default_mtu_leaves_payload_room() {
        let config = TransportConfig::default();
        assert!(config.mtu > HEADER_SIZE);
        assert!(config.window >= 1);
    }
}
