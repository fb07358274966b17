//! # Connection State Machine
//!
//! One reliable byte stream between a local port and a single peer. The
//! connection never touches the network: every segment it produces lands in
//! its outbox and the [`Dispatcher`](crate::dispatcher::Dispatcher) flushes
//! the outbox after each entry point.
//!
//! ```text
//!   SYN ──▶ Handshaking ──SYN+ACK emitted──▶ Established
//!                                               │
//!                              local close / peer FIN
//!                                               ▼
//!                                            Closing ──finish──▶ Closed
//! ```
//!
//! Reliability is cumulative-ACK go-back-one: a single retransmit timer
//! guards the oldest unacknowledged segment, and only that segment is resent
//! when it fires. Out-of-order segments are not buffered.

use bytes::{Bytes, BytesMut};
use quanta::{Clock, Instant};
use std::collections::VecDeque;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::config::TransportConfig;
use crate::congestion::CongestionWindow;
use crate::error::{TransportError, TransportResult};
use crate::rtt::RttEstimator;
use crate::segment::{Flags, Segment, SegmentHeader};
use crate::send_buffer::{SendBuffer, UnackedSegment};
use crate::seq::{seq_add, seq_gt, seq_lt};
use crate::stats::ConnectionStats;
use crate::timer::RetransmitTimer;

// ─── Identity ───────────────────────────────────────────────────────────────

/// The 4-tuple a connection is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    pub peer_addr: IpAddr,
    pub peer_port: u16,
    pub local_addr: IpAddr,
    pub local_port: u16,
}

impl ConnectionId {
    pub fn new(peer_addr: IpAddr, peer_port: u16, local_addr: IpAddr, local_port: u16) -> Self {
        ConnectionId {
            peer_addr,
            peer_port,
            local_addr,
            local_port,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        SocketAddr::new(self.peer_addr, self.peer_port)
    }

    pub fn local(&self) -> SocketAddr {
        SocketAddr::new(self.local_addr, self.local_port)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.peer(), self.local())
    }
}

// ─── State ──────────────────────────────────────────────────────────────────

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// SYN received, SYN+ACK not yet emitted.
    Handshaking,
    /// Data may flow in both directions.
    Established,
    /// One side has signalled termination.
    Closing,
    /// Finished by the dispatcher; inbound segments are ignored.
    Closed,
}

impl ConnectionState {
    /// Whether the application may still hand bytes to `send`.
    pub fn accepts_data(self) -> bool {
        matches!(self, ConnectionState::Handshaking | ConnectionState::Established)
    }
}

// ─── Outbound ───────────────────────────────────────────────────────────────

/// An encoded segment waiting to be handed to the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub dst: IpAddr,
    pub segment: Bytes,
}

/// Application hook invoked with each in-order chunk of peer data. A
/// zero-length chunk signals end of stream.
pub type ReceiveCallback = Box<dyn FnMut(&mut Connection, &[u8])>;

// ─── Connection ─────────────────────────────────────────────────────────────

pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    config: TransportConfig,
    clock: Clock,

    /// Sequence number of the next new byte this side will send.
    send_next: u32,
    /// Sequence number of the next byte expected from the peer.
    recv_next: u32,
    /// Set once a FIN has gone out from this side.
    locally_closed: bool,

    send_buffer: SendBuffer,
    /// Application bytes waiting for congestion window space.
    pending_send: BytesMut,
    /// Bytes written while a retransmission is outstanding.
    deferred_send: BytesMut,

    rtt: RttEstimator,
    congestion: CongestionWindow,
    timer: RetransmitTimer,

    on_receive: Option<ReceiveCallback>,
    outbox: VecDeque<Outbound>,
    stats: ConnectionStats,
}

impl Connection {
    /// Accept a peer's SYN carrying `peer_seq` and queue the SYN+ACK reply.
    pub(crate) fn accept(
        id: ConnectionId,
        peer_seq: u32,
        config: &TransportConfig,
        clock: Clock,
    ) -> Self {
        let isn = config.initial_sequence.unwrap_or_else(rand::random);
        let mut conn = Connection {
            id,
            state: ConnectionState::Handshaking,
            config: config.clone(),
            clock,
            send_next: isn,
            recv_next: peer_seq.wrapping_add(1),
            locally_closed: false,
            send_buffer: SendBuffer::new(),
            pending_send: BytesMut::new(),
            deferred_send: BytesMut::new(),
            rtt: RttEstimator::from_config(config),
            congestion: CongestionWindow::from_config(config),
            timer: RetransmitTimer::new(),
            on_receive: None,
            outbox: VecDeque::new(),
            stats: ConnectionStats::new(),
        };

        conn.emit(isn, conn.recv_next, Flags::SYN | Flags::ACK, Bytes::new());
        // The SYN occupies one sequence slot.
        conn.send_next = isn.wrapping_add(1);
        conn.set_state(ConnectionState::Established);
        conn
    }

    // ─── Inbound ────────────────────────────────────────────────────────

    /// Process one segment the dispatcher routed to this connection.
    pub(crate) fn on_inbound_segment(&mut self, seq: u32, ack: u32, flags: Flags, payload: &[u8]) {
        if self.state == ConnectionState::Closed {
            tracing::warn!(conn = %self.id, seq, ack, %flags, "segment on closed connection ignored");
            return;
        }
        self.stats.segments_received += 1;
        tracing::trace!(conn = %self.id, seq, ack, %flags, len = payload.len(), "segment in");

        if flags.is_fin() {
            self.recv_next = self.recv_next.wrapping_add(1);
            self.set_state(ConnectionState::Closing);
        }

        if flags.is_ack() && !self.send_buffer.is_empty() {
            self.on_ack(ack);
        }

        if payload.is_empty() {
            return;
        }

        if seq == self.recv_next {
            self.recv_next = seq_add(self.recv_next, payload.len());
            self.stats.bytes_delivered += payload.len() as u64;
            self.deliver(payload);
            self.emit_ack();
        } else if seq_lt(seq, self.recv_next) {
            self.stats.duplicates += 1;
            tracing::trace!(conn = %self.id, seq, recv_next = self.recv_next, "duplicate segment");
            if self.config.reack_duplicates {
                self.emit_ack();
            }
        } else {
            self.stats.out_of_order += 1;
            tracing::trace!(conn = %self.id, seq, recv_next = self.recv_next, "out-of-order segment dropped");
        }
    }

    fn on_ack(&mut self, ack: u32) {
        let now = self.clock.now();

        if seq_gt(ack, self.send_next) {
            tracing::warn!(conn = %self.id, ack, send_next = self.send_next, "ack beyond send_next");
            self.send_next = ack;
        }

        if let Some(sample) = self.send_buffer.rtt_sample_for(ack, now) {
            self.rtt.on_sample(sample);
            self.stats.rtt_samples += 1;
            tracing::trace!(
                conn = %self.id,
                sample_us = sample.as_micros() as u64,
                rto_ms = self.rtt.retransmit_timeout().as_millis() as u64,
                "rtt sample"
            );
        }

        self.send_buffer.pop_covered(ack);

        if self.send_buffer.is_empty() {
            self.timer.cancel();
            self.congestion.on_flight_cleared();
        } else {
            self.timer.arm(now, self.rtt.retransmit_timeout());
        }

        if !self.send_buffer.has_retransmitted() && !self.deferred_send.is_empty() {
            let deferred = self.deferred_send.split();
            self.pending_send.unsplit(deferred);
        }
        if !self.pending_send.is_empty() {
            self.admit();
        }
    }

    fn deliver(&mut self, data: &[u8]) {
        if let Some(mut callback) = self.on_receive.take() {
            callback(self, data);
            // Keep a callback registered from inside the callback.
            if self.on_receive.is_none() {
                self.on_receive = Some(callback);
            }
        }
    }

    /// Signal end of stream to the application.
    pub(crate) fn deliver_end_of_stream(&mut self) {
        self.deliver(&[]);
    }

    // ─── Outbound ───────────────────────────────────────────────────────

    /// Queue application bytes for reliable delivery. Returns the number of
    /// bytes accepted.
    pub fn send(&mut self, data: &[u8]) -> TransportResult<usize> {
        if !self.state.accepts_data() {
            return Err(self.invalid_state("send"));
        }
        if data.is_empty() {
            return Ok(0);
        }

        if self.send_buffer.has_retransmitted() {
            self.deferred_send.extend_from_slice(data);
        } else {
            self.pending_send.extend_from_slice(data);
            self.admit();
        }
        Ok(data.len())
    }

    /// Move pending bytes into flight while the congestion window allows.
    fn admit(&mut self) {
        if !self.state.accepts_data() {
            return;
        }
        let now = self.clock.now();
        while !self.pending_send.is_empty() && self.congestion.allows(self.send_buffer.len()) {
            let n = self.pending_send.len().min(self.config.mss);
            let payload = self.pending_send.split_to(n).freeze();
            let start = self.send_next;

            self.emit(start, self.recv_next, Flags::ACK, payload.clone());
            self.send_buffer.push(UnackedSegment::new(start, payload, now));
            self.send_next = seq_add(start, n);
            self.stats.bytes_sent += n as u64;

            if self.send_buffer.len() == 1 {
                self.timer.arm(now, self.rtt.retransmit_timeout());
            }
        }
    }

    /// Fire the retransmit timer if its deadline has passed by `now`.
    pub(crate) fn handle_timeout(&mut self, now: Instant) {
        if self.timer.take_expired(now).is_none() {
            return;
        }

        let Some(oldest) = self.send_buffer.oldest_mut() else {
            tracing::trace!(conn = %self.id, "spurious timer fire");
            return;
        };
        oldest.retransmitted = true;
        oldest.sent_at = now;
        let start = oldest.start;
        let payload = oldest.payload.clone();

        self.congestion.on_timeout();
        self.stats.timeouts += 1;
        self.stats.retransmissions += 1;
        tracing::debug!(
            conn = %self.id,
            seq = start,
            len = payload.len(),
            cwnd = self.congestion.get(),
            "retransmit timeout"
        );

        self.emit(start, self.recv_next, Flags::ACK, payload);
        self.timer.arm(now, self.rtt.retransmit_timeout());
    }

    /// Send FIN and stop transmitting. Unsent and unacknowledged bytes are
    /// abandoned.
    pub fn close(&mut self) -> TransportResult<()> {
        if !self.state.accepts_data() {
            return Err(self.invalid_state("close"));
        }
        self.emit_fin();
        self.abandon();
        self.set_state(ConnectionState::Closing);
        Ok(())
    }

    /// Complete teardown after the peer's FIN.
    pub(crate) fn finish(&mut self) {
        if self.locally_closed {
            self.emit_ack();
        } else {
            self.emit_fin();
        }
        self.abandon();
        self.set_state(ConnectionState::Closed);
    }

    fn emit_fin(&mut self) {
        self.emit(self.send_next, self.recv_next, Flags::FIN | Flags::ACK, Bytes::new());
        self.send_next = self.send_next.wrapping_add(1);
        self.locally_closed = true;
    }

    fn emit_ack(&mut self) {
        self.emit(self.send_next, self.recv_next, Flags::ACK, Bytes::new());
    }

    fn abandon(&mut self) {
        self.send_buffer.clear();
        self.pending_send.clear();
        self.deferred_send.clear();
        self.timer.cancel();
    }

    fn emit(&mut self, seq: u32, ack: u32, flags: Flags, payload: Bytes) {
        let header = SegmentHeader::new(self.id.local_port, self.id.peer_port, seq, ack, flags)
            .with_window(self.config.advertised_window);
        let segment = Segment::new(header, payload).encode(self.id.local_addr, self.id.peer_addr);
        tracing::trace!(conn = %self.id, seq, ack, %flags, len = segment.len(), "segment out");

        self.stats.segments_sent += 1;
        self.outbox.push_back(Outbound {
            dst: self.id.peer_addr,
            segment,
        });
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(conn = %self.id, from = ?self.state, to = ?state, "state change");
            self.state = state;
        }
    }

    fn invalid_state(&self, op: &'static str) -> TransportError {
        TransportError::InvalidState {
            id: self.id,
            state: self.state,
            op,
        }
    }

    /// Take every queued outbound segment.
    pub(crate) fn drain_outbox(&mut self) -> impl Iterator<Item = Outbound> + '_ {
        self.outbox.drain(..)
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    /// Register the hook that receives in-order peer data.
    pub fn register_receive_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Connection, &[u8]) + 'static,
    {
        self.on_receive = Some(Box::new(callback));
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn send_next(&self) -> u32 {
        self.send_next
    }

    pub fn recv_next(&self) -> u32 {
        self.recv_next
    }

    /// Number of unacknowledged segments.
    pub fn in_flight(&self) -> usize {
        self.send_buffer.len()
    }

    /// Unacknowledged payload bytes.
    pub fn bytes_in_flight(&self) -> usize {
        self.send_buffer.bytes_in_flight()
    }

    /// Bytes accepted by `send` but not yet transmitted.
    pub fn pending_len(&self) -> usize {
        self.pending_send.len() + self.deferred_send.len()
    }

    /// Congestion window in segments.
    pub fn congestion_window(&self) -> u32 {
        self.congestion.get()
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("send_next", &self.send_next)
            .field("recv_next", &self.recv_next)
            .field("in_flight", &self.send_buffer.len())
            .field("pending", &self.pending_len())
            .field("cwnd", &self.congestion.get())
            .field("timer", &self.timer.deadline())
            .finish_non_exhaustive()
    }
}
