//! Scripted client peer.
//!
//! The transport only implements the passive side, so simulations need
//! something to dial it. [`ScriptedClient`] is a deliberately small active
//! opener speaking the same wire format: it sends a SYN, streams a fixed
//! payload with a go-back-N window, acknowledges every in-order byte it gets
//! back, and sends a FIN once it has received `expect_bytes`.
//!
//! ```text
//!   SynSent ──SYN+ACK──▶ Established ──all bytes back──▶ FinSent ──FIN+ACK──▶ Done
//! ```

use bytes::Bytes;
use quanta::Instant;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Duration;

use ferry_transport::segment::check_checksum;
use ferry_transport::seq::seq_add;
use ferry_transport::{Flags, Segment, SegmentHeader};

use crate::link::Packet;

/// Client behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub port: u16,
    pub initial_sequence: u32,
    pub mss: usize,
    /// Maximum unacknowledged segments.
    pub window: usize,
    /// Fixed retransmission timeout.
    pub rto_ms: u64,
    /// Consecutive timeouts without progress before giving up.
    pub max_retries: u32,
    /// FIN retransmissions before closing without the server's FIN+ACK.
    pub fin_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            port: 40_000,
            initial_sequence: 1_000,
            mss: 1_000,
            window: 4,
            rto_ms: 200,
            max_retries: 30,
            fin_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    SynSent,
    Established,
    FinSent,
    Done,
    GaveUp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub segments_sent: u64,
    pub retransmissions: u64,
    pub segments_received: u64,
    pub dropped_corrupt: u64,
    pub bytes_acked: u64,
    pub bytes_received: u64,
    /// Set when the client closed without seeing the server's FIN.
    pub fin_unanswered: bool,
}

#[derive(Debug)]
pub struct ScriptedClient {
    config: ClientConfig,
    addr: IpAddr,
    server_addr: IpAddr,
    server_port: u16,
    state: ClientState,

    payload: Bytes,
    /// Offset of the first unacknowledged payload byte.
    acked: usize,
    /// Offset of the next payload byte to transmit.
    next: usize,

    /// Next sequence number expected from the server; known after SYN+ACK.
    recv_next: u32,
    received: Vec<u8>,
    expect_bytes: usize,

    deadline: Option<Instant>,
    retries: u32,
    outbox: VecDeque<Packet>,
    stats: ClientStats,
}

impl ScriptedClient {
    pub fn new(
        config: ClientConfig,
        addr: IpAddr,
        server_addr: IpAddr,
        server_port: u16,
        payload: Bytes,
        expect_bytes: usize,
    ) -> Self {
        ScriptedClient {
            config,
            addr,
            server_addr,
            server_port,
            state: ClientState::SynSent,
            payload,
            acked: 0,
            next: 0,
            recv_next: 0,
            received: Vec::new(),
            expect_bytes,
            deadline: None,
            retries: 0,
            outbox: VecDeque::new(),
            stats: ClientStats::default(),
        }
    }

    /// Send the opening SYN.
    pub fn start(&mut self, now: Instant) {
        self.emit(self.config.initial_sequence, 0, Flags::SYN, Bytes::new());
        self.arm(now);
    }

    /// Sequence number of payload offset `offset`.
    fn seq_of(&self, offset: usize) -> u32 {
        seq_add(self.config.initial_sequence.wrapping_add(1), offset)
    }

    // ─── Inbound ────────────────────────────────────────────────────────

    pub fn on_packet(&mut self, now: Instant, packet: Packet) {
        if check_checksum(packet.src, packet.dst, &packet.data).is_err() {
            self.stats.dropped_corrupt += 1;
            return;
        }
        let Ok(segment) = Segment::parse(&packet.data) else {
            self.stats.dropped_corrupt += 1;
            return;
        };
        let hdr = &segment.header;
        if hdr.dst_port != self.config.port || hdr.src_port != self.server_port {
            return;
        }
        self.stats.segments_received += 1;

        match self.state {
            ClientState::SynSent => {
                if hdr.flags.contains(Flags::SYN | Flags::ACK)
                    && hdr.ack == self.seq_of(0)
                {
                    self.recv_next = hdr.seq.wrapping_add(1);
                    self.state = ClientState::Established;
                    tracing::debug!(server_isn = hdr.seq, "client established");
                    self.emit_ack();
                    self.retries = 0;
                    self.deadline = None;
                    self.pump(now);
                    self.maybe_finish(now);
                }
            }
            ClientState::Established | ClientState::FinSent => {
                if hdr.flags.is_syn() {
                    // Duplicated SYN+ACK.
                    self.emit_ack();
                    return;
                }
                if hdr.flags.is_ack() {
                    self.on_ack(now, hdr.ack);
                }
                if !segment.payload.is_empty() {
                    self.on_data(hdr.seq, &segment.payload);
                }
                if hdr.flags.is_fin() && self.state == ClientState::FinSent {
                    self.recv_next = self.recv_next.wrapping_add(1);
                    self.emit_ack();
                    self.state = ClientState::Done;
                    self.deadline = None;
                    tracing::debug!("client done");
                    return;
                }
                self.maybe_finish(now);
            }
            ClientState::Done | ClientState::GaveUp => {}
        }
    }

    fn on_ack(&mut self, now: Instant, ack: u32) {
        let offset = ack.wrapping_sub(self.seq_of(0)) as usize;
        if offset > self.payload.len() || offset <= self.acked {
            return;
        }
        self.stats.bytes_acked += (offset - self.acked) as u64;
        self.acked = offset;
        self.next = self.next.max(offset);
        self.retries = 0;
        self.deadline = None;
        self.pump(now);
    }

    fn on_data(&mut self, seq: u32, data: &[u8]) {
        if seq == self.recv_next {
            self.recv_next = seq_add(self.recv_next, data.len());
            self.received.extend_from_slice(data);
            self.stats.bytes_received += data.len() as u64;
        }
        // In order, duplicate or early: always report where we are.
        self.emit_ack();
    }

    // ─── Outbound ───────────────────────────────────────────────────────

    /// Transmit new segments while the window allows.
    fn pump(&mut self, now: Instant) {
        if self.state != ClientState::Established {
            return;
        }
        let window_bytes = self.config.window * self.config.mss;
        while self.next < self.payload.len() && self.next - self.acked < window_bytes {
            let end = (self.next + self.config.mss).min(self.payload.len());
            let chunk = self.payload.slice(self.next..end);
            self.emit(self.seq_of(self.next), self.recv_next, Flags::ACK, chunk);
            self.next = end;
        }
        if self.acked < self.payload.len() && self.deadline.is_none() {
            self.arm(now);
        }
    }

    fn maybe_finish(&mut self, now: Instant) {
        if self.state == ClientState::Established
            && self.acked == self.payload.len()
            && self.received.len() >= self.expect_bytes
        {
            self.emit_fin();
            self.state = ClientState::FinSent;
            self.retries = 0;
            self.arm(now);
        }
    }

    /// Retransmission timer. Go-back-N from the oldest unacknowledged byte.
    pub fn handle_timeout(&mut self, now: Instant) {
        let Some(deadline) = self.deadline else {
            return;
        };
        if deadline > now {
            return;
        }
        self.deadline = None;

        self.retries += 1;
        if self.retries > self.config.max_retries {
            tracing::warn!(state = ?self.state, retries = self.retries, "client gave up");
            self.state = ClientState::GaveUp;
            return;
        }

        match self.state {
            ClientState::SynSent => {
                self.stats.retransmissions += 1;
                self.emit(self.config.initial_sequence, 0, Flags::SYN, Bytes::new());
                self.arm(now);
            }
            ClientState::Established => {
                if self.acked < self.payload.len() {
                    self.stats.retransmissions += 1;
                    self.next = self.acked;
                    self.pump(now);
                }
                if self.deadline.is_none() {
                    self.arm(now);
                }
            }
            ClientState::FinSent if self.retries > self.config.fin_retries => {
                // The server forgets the connection once it has answered our
                // FIN, so a lost FIN+ACK is never repeated.
                tracing::debug!(retries = self.retries, "client closing without FIN+ACK");
                self.stats.fin_unanswered = true;
                self.state = ClientState::Done;
            }
            ClientState::FinSent => {
                self.stats.retransmissions += 1;
                self.emit_fin();
                self.arm(now);
            }
            ClientState::Done | ClientState::GaveUp => {}
        }
    }

    fn emit_ack(&mut self) {
        let seq = self.seq_of(self.next);
        self.emit(seq, self.recv_next, Flags::ACK, Bytes::new());
    }

    fn emit_fin(&mut self) {
        let seq = self.seq_of(self.payload.len());
        self.emit(seq, self.recv_next, Flags::FIN | Flags::ACK, Bytes::new());
    }

    fn emit(&mut self, seq: u32, ack: u32, flags: Flags, payload: Bytes) {
        let header = SegmentHeader::new(self.config.port, self.server_port, seq, ack, flags)
            .with_window(u16::MAX);
        let data = Segment::new(header, payload).encode(self.addr, self.server_addr);
        self.stats.segments_sent += 1;
        self.outbox.push_back(Packet {
            src: self.addr,
            dst: self.server_addr,
            data,
        });
    }

    fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + Duration::from_millis(self.config.rto_ms));
    }

    pub fn drain_outbox(&mut self) -> impl Iterator<Item = Packet> + '_ {
        self.outbox.drain(..)
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Whether the client has stopped: completed or gave up.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, ClientState::Done | ClientState::GaveUp)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn received(&self) -> &[u8] {
        &self.received
    }

    /// Whether every payload byte has been acknowledged.
    pub fn all_acked(&self) -> bool {
        self.acked == self.payload.len()
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quanta::Clock;
    use std::net::Ipv4Addr;

    const SERVER_PORT: u16 = 80;
    const SERVER_ISN: u32 = 9_000;

    fn client_addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))
    }

    fn server_addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
    }

    fn client(payload: &'static [u8]) -> ScriptedClient {
        let config = ClientConfig {
            mss: 4,
            window: 2,
            ..Default::default()
        };
        ScriptedClient::new(
            config,
            client_addr(),
            server_addr(),
            SERVER_PORT,
            Bytes::from_static(payload),
            payload.len(),
        )
    }

    fn from_server(seq: u32, ack: u32, flags: Flags, payload: &[u8]) -> Packet {
        let header = SegmentHeader::new(SERVER_PORT, 40_000, seq, ack, flags);
        Packet {
            src: server_addr(),
            dst: client_addr(),
            data: Segment::new(header, Bytes::copy_from_slice(payload))
                .encode(server_addr(), client_addr()),
        }
    }

    fn sent(client: &mut ScriptedClient) -> Vec<Segment> {
        client
            .drain_outbox()
            .map(|p| Segment::parse(&p.data).unwrap())
            .collect()
    }

    #[test]
    fn handshake_then_windowed_data() {
        let (clock, _mock) = Clock::mock();
        let mut c = client(b"abcdefghij");
        c.start(clock.now());

        let syn = sent(&mut c);
        assert_eq!(syn[0].header.flags, Flags::SYN);
        assert_eq!(syn[0].header.seq, 1_000);

        c.on_packet(clock.now(), from_server(SERVER_ISN, 1_001, Flags::SYN | Flags::ACK, b""));
        assert_eq!(c.state(), ClientState::Established);

        let out = sent(&mut c);
        // Handshake ACK plus a two-segment window.
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].header.ack, SERVER_ISN + 1);
        assert_eq!(&out[1].payload[..], b"abcd");
        assert_eq!(&out[2].payload[..], b"efgh");
        assert_eq!(out[2].header.seq, 1_005);
    }

    #[test]
    fn timeout_goes_back_to_oldest_unacked() {
        let (clock, mock) = Clock::mock();
        let mut c = client(b"abcdefghij");
        c.start(clock.now());
        c.on_packet(clock.now(), from_server(SERVER_ISN, 1_001, Flags::SYN | Flags::ACK, b""));
        sent(&mut c);

        c.on_packet(clock.now(), from_server(SERVER_ISN + 1, 1_005, Flags::ACK, b""));
        let more = sent(&mut c);
        assert_eq!(&more[0].payload[..], b"ij");

        mock.increment(Duration::from_millis(200));
        c.handle_timeout(clock.now());
        let resent = sent(&mut c);
        assert_eq!(resent[0].header.seq, 1_005);
        assert_eq!(&resent[0].payload[..], b"efgh");
        assert_eq!(c.stats().retransmissions, 1);
    }

    #[test]
    fn finishes_after_echo_and_fin_ack() {
        let (clock, _mock) = Clock::mock();
        let mut c = client(b"hi");
        c.start(clock.now());
        c.on_packet(clock.now(), from_server(SERVER_ISN, 1_001, Flags::SYN | Flags::ACK, b""));
        sent(&mut c);

        c.on_packet(clock.now(), from_server(SERVER_ISN + 1, 1_003, Flags::ACK, b"hi"));
        assert_eq!(c.received(), b"hi");
        assert!(c.all_acked());
        assert_eq!(c.state(), ClientState::FinSent);
        let out = sent(&mut c);
        assert_eq!(out.last().unwrap().header.flags, Flags::FIN | Flags::ACK);
        assert_eq!(out.last().unwrap().header.seq, 1_003);

        c.on_packet(
            clock.now(),
            from_server(SERVER_ISN + 3, 1_004, Flags::FIN | Flags::ACK, b""),
        );
        assert_eq!(c.state(), ClientState::Done);
        assert!(c.is_finished());
    }

    #[test]
    fn corrupt_packets_are_ignored() {
        let (clock, _mock) = Clock::mock();
        let mut c = client(b"x");
        c.start(clock.now());
        let mut packet = from_server(SERVER_ISN, 1_001, Flags::SYN | Flags::ACK, b"");
        let mut data = packet.data.to_vec();
        data[5] ^= 0x10;
        packet.data = Bytes::from(data);

        c.on_packet(clock.now(), packet);
        assert_eq!(c.state(), ClientState::SynSent);
        assert_eq!(c.stats().dropped_corrupt, 1);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let (clock, mock) = Clock::mock();
        let mut c = client(b"x");
        c.config.max_retries = 2;
        c.start(clock.now());
        for _ in 0..3 {
            mock.increment(Duration::from_millis(200));
            c.handle_timeout(clock.now());
        }
        assert_eq!(c.state(), ClientState::GaveUp);
        assert_eq!(c.stats().retransmissions, 2);
    }
}
