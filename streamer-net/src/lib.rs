//! Network channels for the transport.
//!
//! This crate provides the datagram-channel boundary the connection layer is
//! built over: a real UDP implementation, an in-memory pair for tests, and
//! the deterministic fault injector that simulates loss, corruption, delay,
//! and reordering.

pub mod channel;
pub mod fault;
pub mod udp;

pub use channel::{
    ChannelError, ChannelStats, DatagramChannel, MemoryChannel, StatsSnapshot, MAX_DATAGRAM_SIZE,
};
pub use fault::{FaultProfile, LossyChannel, DEFAULT_SEED};
pub use udp::UdpChannel;
