//! UDP datagram channel.
//!
//! Wraps a socket2-configured UDP socket connected to a single peer. This is
//! the production channel; tests usually layer the fault injector over it (or
//! skip sockets entirely with the in-memory pair).

use crate::channel::{ChannelError, DatagramChannel, MAX_DATAGRAM_SIZE};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Receive buffer size; comfortably above the 1472-byte datagram bound.
const RECV_BUF_LEN: usize = 2048;

/// UDP channel connected to one remote peer.
pub struct UdpChannel {
    socket: UdpSocket,
    /// Last read timeout applied to the socket, to avoid a setsockopt per
    /// receive.
    read_timeout: Mutex<Option<Duration>>,
}

impl UdpChannel {
    /// Bind `local` and connect the socket to `remote`.
    pub fn bind(local: SocketAddr, remote: SocketAddr) -> Result<Self, ChannelError> {
        let domain = if local.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&local.into())?;
        socket.connect(&remote.into())?;

        Ok(UdpChannel {
            socket: socket.into(),
            read_timeout: Mutex::new(None),
        })
    }

    /// Local address the socket is bound to (useful after binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ChannelError> {
        Ok(self.socket.local_addr()?)
    }
}

impl DatagramChannel for UdpChannel {
    fn send(&self, datagram: &[u8]) -> Result<(), ChannelError> {
        if datagram.len() > self.max_datagram_size() {
            return Err(ChannelError::Oversized {
                len: datagram.len(),
                max: self.max_datagram_size(),
            });
        }

        loop {
            match self.socket.send(datagram) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ChannelError::Io(e)),
            }
        }
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, ChannelError> {
        {
            let mut current = self.read_timeout.lock();
            if *current != Some(timeout) {
                self.socket.set_read_timeout(Some(timeout))?;
                *current = Some(timeout);
            }
        }

        let mut buf = [0u8; RECV_BUF_LEN];
        loop {
            match self.socket.recv(&mut buf) {
                Ok(len) => return Ok(Some(buf[..len].to_vec())),
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(None)
                }
                // Transient interruption is retried, never surfaced.
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ChannelError::Io(e)),
            }
        }
    }

    fn max_datagram_size(&self) -> usize {
        MAX_DATAGRAM_SIZE
    }
}
