//! Reliable byte-stream transport over an unreliable datagram network.
//!
//! The simulated network below may drop, corrupt, delay, and reorder
//! datagrams; a [`Connection`] turns it into an exact, ordered,
//! duplicate-free byte stream with blocking `send`/`recv`/`close` semantics.

pub use streamer_net as net;
pub use streamer_protocol as protocol;

pub mod config;
pub mod connection;

pub use config::TransportConfig;
pub use connection::{Connection, ConnectionError};

// Re-export commonly used types
pub use streamer_net::{DatagramChannel, FaultProfile, LossyChannel, MemoryChannel, UdpChannel};
pub use streamer_protocol::{Segment, SegmentKind, StreamOffset};
