//! Connection lifecycle and the blocking application API.
//!
//! A [`Connection`] composes the protocol state machines with an injected
//! datagram channel and two background threads:
//!
//! - the *receive* thread drains the channel and dispatches segments — ACKs
//!   into the send window, DATA/FIN into the reassembler (answering each with
//!   a cumulative ACK);
//! - the *timer* thread drives retransmission timeouts and refills the send
//!   window.
//!
//! The application's `send`, `recv`, and `close` block on condvars until the
//! background activity has made the call's outcome true: `send` until every
//! byte of the call is acknowledged, `recv` until contiguous bytes are
//! deliverable, `close` until all outstanding data plus the FIN handshake are
//! resolved. Shared state is split into exactly two exclusion domains — the
//! sender's (segmenter + window) and the receiver's (reassembler) — each
//! guarded by one mutex.

use crate::config::TransportConfig;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use streamer_net::{
    ChannelError, DatagramChannel, FaultProfile, LossyChannel, UdpChannel,
};
use streamer_protocol::{
    RetransmitPolicy, RetryExhausted, Reassembler, Segment, SegmentKind, Segmenter, SendWindow,
    StreamOffset, HEADER_SIZE,
};
use thiserror::Error;
use tracing::{debug, trace};

/// Connection errors.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    RetryExhausted(#[from] RetryExhausted),

    #[error("Connection is closed")]
    Closed,
}

/// Fatal condition raised by a background thread; poisons the connection.
#[derive(Debug, Clone)]
enum Fatal {
    RetryExhausted(RetryExhausted),
    ChannelClosed,
}

impl From<Fatal> for ConnectionError {
    fn from(fatal: Fatal) -> Self {
        match fatal {
            Fatal::RetryExhausted(e) => ConnectionError::RetryExhausted(e),
            Fatal::ChannelClosed => ConnectionError::Channel(ChannelError::Closed),
        }
    }
}

/// Sender exclusion domain: stream cursor plus retransmitting window.
struct TxState {
    segmenter: Segmenter,
    window: SendWindow,
    fin_sent: bool,
}

/// Receiver exclusion domain.
struct RxState {
    reassembler: Reassembler,
}

struct Shared {
    channel: Arc<dyn DatagramChannel>,
    config: TransportConfig,
    tx: Mutex<TxState>,
    /// Signaled whenever the acked watermark advances or a fatal trips.
    tx_progress: Condvar,
    rx: Mutex<RxState>,
    /// Signaled whenever bytes become deliverable, the stream finishes, or a
    /// fatal trips.
    rx_ready: Condvar,
    fatal: Mutex<Option<Fatal>>,
    shutdown: AtomicBool,
}

impl Shared {
    /// Record the first fatal condition and wake every blocked caller.
    fn fail(&self, fatal: Fatal) {
        let mut slot = self.fatal.lock();
        if slot.is_none() {
            debug!(?fatal, "connection poisoned");
            *slot = Some(fatal);
        }
        drop(slot);
        self.tx_progress.notify_all();
        self.rx_ready.notify_all();
    }

    fn fatal(&self) -> Option<Fatal> {
        self.fatal.lock().clone()
    }

    /// Push segments out the channel. Must be called without holding the
    /// sender or receiver mutex: the channel may pace each datagram.
    fn transmit(&self, segments: &[Segment]) {
        for segment in segments {
            trace!(kind = ?segment.kind, offset = %segment.offset, "transmit");
            match self.channel.send(&segment.encode()) {
                Ok(()) => {}
                Err(ChannelError::Closed) => {
                    self.fail(Fatal::ChannelClosed);
                    return;
                }
                Err(e) => debug!(error = %e, "transmit failed"),
            }
        }
    }
}

/// A reliable byte-stream connection over an unreliable datagram channel.
pub struct Connection {
    shared: Arc<Shared>,
    recv_thread: Option<JoinHandle<()>>,
    timer_thread: Option<JoinHandle<()>>,
    closed: bool,
}

impl Connection {
    /// Build a connection over any injected channel.
    pub fn new<C: DatagramChannel + 'static>(
        channel: C,
        config: TransportConfig,
    ) -> Result<Self, ConnectionError> {
        Self::with_channel(Arc::new(channel), config)
    }

    /// Build a connection over a shared channel handle.
    ///
    /// Useful when the caller wants to keep a handle for reading channel
    /// statistics while the connection runs.
    pub fn with_channel(
        channel: Arc<dyn DatagramChannel>,
        config: TransportConfig,
    ) -> Result<Self, ConnectionError> {
        let max_payload = config.mtu.min(channel.max_datagram_size()) - HEADER_SIZE;
        let policy = RetransmitPolicy {
            initial_rto: config.initial_rto,
            max_rto: config.max_rto,
            max_retries: config.max_retries,
        };

        let shared = Arc::new(Shared {
            channel,
            tx: Mutex::new(TxState {
                segmenter: Segmenter::new(max_payload),
                window: SendWindow::new(config.window, policy),
                fin_sent: false,
            }),
            tx_progress: Condvar::new(),
            rx: Mutex::new(RxState {
                reassembler: Reassembler::new(),
            }),
            rx_ready: Condvar::new(),
            fatal: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            config,
        });

        let recv_thread = thread::Builder::new()
            .name("streamer-recv".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_receive_loop(&shared)
            })
            .map_err(ChannelError::Io)?;

        let timer_thread = thread::Builder::new()
            .name("streamer-timer".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_timer_loop(&shared)
            })
            .map_err(ChannelError::Io)?;

        Ok(Connection {
            shared,
            recv_thread: Some(recv_thread),
            timer_thread: Some(timer_thread),
            closed: false,
        })
    }

    /// Open a connection over a plain UDP socket.
    pub fn open(
        local: SocketAddr,
        remote: SocketAddr,
        config: TransportConfig,
    ) -> Result<Self, ConnectionError> {
        Self::new(UdpChannel::bind(local, remote)?, config)
    }

    /// Open a connection over UDP with the fault injector layered on top,
    /// matching the simulated-network test harness.
    pub fn open_faulty(
        local: SocketAddr,
        remote: SocketAddr,
        profile: FaultProfile,
        config: TransportConfig,
    ) -> Result<Self, ConnectionError> {
        let channel = LossyChannel::new(UdpChannel::bind(local, remote)?, profile);
        Self::new(channel, config)
    }

    /// Send `data` reliably; returns once every byte has been acknowledged.
    ///
    /// The call may suspend for as long as retransmission takes; the
    /// unreliable channel below is invisible beyond the added latency.
    pub fn send(&self, data: &[u8]) -> Result<(), ConnectionError> {
        if let Some(fatal) = self.shared.fatal() {
            return Err(fatal.into());
        }

        let target;
        let to_send = {
            let mut tx = self.shared.tx.lock();
            if tx.fin_sent {
                return Err(ConnectionError::Closed);
            }
            let segments = tx.segmenter.split(data);
            for segment in segments {
                tx.window.enqueue(segment);
            }
            target = tx.segmenter.cursor();
            tx.window.fill(Instant::now())
        };
        self.shared.transmit(&to_send);

        self.wait_acked(target)
    }

    /// Receive the next contiguous chunk of the peer's stream.
    ///
    /// Blocks without busy-waiting until at least one byte is deliverable,
    /// then returns the longest currently-contiguous range. Returns an empty
    /// buffer once the peer's stream has ended and everything was read.
    pub fn recv(&self) -> Result<Bytes, ConnectionError> {
        let mut rx = self.shared.rx.lock();
        loop {
            if let Some(bytes) = rx.reassembler.take_ready() {
                return Ok(bytes);
            }
            if rx.reassembler.is_finished() {
                return Ok(Bytes::new());
            }
            if let Some(fatal) = self.shared.fatal() {
                return Err(fatal.into());
            }
            self.shared.rx_ready.wait(&mut rx);
        }
    }

    /// Close the connection gracefully.
    ///
    /// Blocks until every queued segment has been acknowledged and the FIN
    /// teardown segment itself is acknowledged by the peer (any FIN received
    /// from the peer was already acknowledged by the receive thread on
    /// arrival). The background threads stay up until the connection is
    /// dropped so that a peer closing later still gets its FIN acknowledged;
    /// the channel resource is released on drop. Idempotent.
    pub fn close(&mut self) -> Result<(), ConnectionError> {
        if self.closed {
            return Ok(());
        }

        let target;
        let to_send = {
            let mut tx = self.shared.tx.lock();
            if !tx.fin_sent {
                let fin = tx.segmenter.split_fin();
                tx.window.enqueue(fin);
                tx.fin_sent = true;
            }
            target = tx.segmenter.cursor();
            tx.window.fill(Instant::now())
        };
        self.shared.transmit(&to_send);

        let result = self.wait_acked(target);
        self.closed = true;
        result
    }

    /// Block until the cumulative acknowledgment covers everything below
    /// `target`.
    fn wait_acked(&self, target: StreamOffset) -> Result<(), ConnectionError> {
        let mut tx = self.shared.tx.lock();
        while tx.window.acked() < target {
            if let Some(fatal) = self.shared.fatal() {
                return Err(fatal.into());
            }
            self.shared.tx_progress.wait(&mut tx);
        }
        Ok(())
    }

    fn shutdown_threads(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.recv_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.timer_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Dropping without close() abandons unflushed data, which is a
        // protocol violation; dropping after close() is the normal release
        // point for the threads and the channel.
        self.shutdown_threads();
    }
}

/// Drain the channel and dispatch incoming segments.
fn run_receive_loop(shared: &Shared) {
    while !shared.shutdown.load(Ordering::Acquire) {
        let datagram = match shared.channel.recv_timeout(shared.config.tick) {
            Ok(Some(datagram)) => datagram,
            Ok(None) => continue,
            Err(ChannelError::Closed) => {
                shared.fail(Fatal::ChannelClosed);
                break;
            }
            Err(e) => {
                debug!(error = %e, "receive failed");
                continue;
            }
        };

        // A datagram that fails to parse — bad checksum included — is
        // treated exactly like a lost one: retransmission recovers it.
        let segment = match Segment::decode(&datagram) {
            Ok(segment) => segment,
            Err(e) => {
                debug!(error = %e, len = datagram.len(), "discarding mangled datagram");
                continue;
            }
        };

        match segment.kind {
            SegmentKind::Ack => {
                let to_send = {
                    let mut tx = shared.tx.lock();
                    if tx.window.handle_ack(segment.offset) {
                        shared.tx_progress.notify_all();
                    }
                    tx.window.fill(Instant::now())
                };
                shared.transmit(&to_send);
            }
            SegmentKind::Data => {
                let arrival = {
                    let mut rx = shared.rx.lock();
                    rx.reassembler.accept_data(segment.offset, segment.payload)
                };
                if arrival.delivered > 0 || arrival.finished {
                    shared.rx_ready.notify_all();
                }
                shared.transmit(&[Segment::ack(arrival.ack)]);
            }
            SegmentKind::Fin => {
                let arrival = {
                    let mut rx = shared.rx.lock();
                    rx.reassembler.accept_fin(segment.offset)
                };
                if arrival.finished {
                    shared.rx_ready.notify_all();
                }
                shared.transmit(&[Segment::ack(arrival.ack)]);
            }
        }
    }
}

/// Drive retransmission timers and keep the window full.
fn run_timer_loop(shared: &Shared) {
    while !shared.shutdown.load(Ordering::Acquire) {
        thread::sleep(shared.config.tick);

        let due = {
            let mut tx = shared.tx.lock();
            match tx.window.due(Instant::now()) {
                Ok(mut segments) => {
                    segments.extend(tx.window.fill(Instant::now()));
                    segments
                }
                Err(exhausted) => {
                    drop(tx);
                    shared.fail(Fatal::RetryExhausted(exhausted));
                    break;
                }
            }
        };
        if !due.is_empty() {
            shared.transmit(&due);
        }
    }
}
