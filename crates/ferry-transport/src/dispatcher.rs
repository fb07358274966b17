//! # Dispatcher
//!
//! Entry point for everything arriving from the network. The dispatcher
//! validates raw segments, routes them to the connection keyed by their
//! 4-tuple, creates connections on SYN and removes them after the peer's
//! FIN. It also owns the clock that drives retransmit timers.
//!
//! ```text
//!   raw segment ──▶ parse ──▶ port check ──▶ checksum ──┬─ SYN ─────▶ accept
//!                                                       ├─ known ───▶ Connection
//!                                                       └─ unknown ─▶ drop
//! ```
//!
//! Every public entry point ends by flushing the outboxes of the connections
//! it touched into the [`Network`].

use bytes::Bytes;
use quanta::{Clock, Instant};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::config::TransportConfig;
use crate::connection::{Connection, ConnectionId};
use crate::error::{TransportError, TransportResult};
use crate::segment::{check_checksum, Segment};
use crate::stats::DispatcherStats;

// ─── Network ────────────────────────────────────────────────────────────────

/// The unreliable packet substrate underneath the transport.
pub trait Network {
    /// Hand a segment to the network for delivery to `dst`. Fire and forget.
    fn send(&mut self, segment: Bytes, dst: IpAddr);
}

impl<N: Network + ?Sized> Network for &mut N {
    fn send(&mut self, segment: Bytes, dst: IpAddr) {
        (**self).send(segment, dst)
    }
}

impl<N: Network + ?Sized> Network for Box<N> {
    fn send(&mut self, segment: Bytes, dst: IpAddr) {
        (**self).send(segment, dst)
    }
}

/// Application hook invoked once per accepted connection.
pub type AcceptCallback = Box<dyn FnMut(&mut Connection)>;

// ─── Registry ───────────────────────────────────────────────────────────────

/// Live connections keyed by 4-tuple.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection, returning any previous one for the same 4-tuple.
    fn insert(&mut self, conn: Connection) -> Option<Connection> {
        self.connections.insert(conn.id(), conn)
    }

    fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        self.connections.remove(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Connection ids in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

// ─── Dispatcher ─────────────────────────────────────────────────────────────

pub struct Dispatcher<N: Network> {
    port: u16,
    network: N,
    config: TransportConfig,
    clock: Clock,
    registry: ConnectionRegistry,
    on_accept: Option<AcceptCallback>,
    stats: DispatcherStats,
}

impl<N: Network> Dispatcher<N> {
    /// Bind a dispatcher to `port` on top of `network`.
    pub fn new(port: u16, network: N, config: TransportConfig) -> TransportResult<Self> {
        Self::with_clock(port, network, config, Clock::new())
    }

    /// Like [`Dispatcher::new`] with an explicit clock, e.g. `Clock::mock()`.
    pub fn with_clock(
        port: u16,
        network: N,
        config: TransportConfig,
        clock: Clock,
    ) -> TransportResult<Self> {
        config.validate()?;
        Ok(Dispatcher {
            port,
            network,
            config,
            clock,
            registry: ConnectionRegistry::new(),
            on_accept: None,
            stats: DispatcherStats::new(),
        })
    }

    /// Register the hook invoked for every connection created by a SYN.
    pub fn register_accept_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Connection) + 'static,
    {
        self.on_accept = Some(Box::new(callback));
    }

    // ─── Inbound ────────────────────────────────────────────────────────

    /// Process one raw segment from `src_addr` addressed to `dst_addr`.
    pub fn handle_inbound_segment(&mut self, src_addr: IpAddr, dst_addr: IpAddr, raw: Bytes) {
        self.stats.segments_received += 1;

        let segment = match Segment::parse(&raw) {
            Ok(segment) => segment,
            Err(e) => {
                tracing::debug!(src = %src_addr, len = raw.len(), error = %e, "malformed segment dropped");
                self.stats.dropped_malformed += 1;
                return;
            }
        };
        let header = &segment.header;

        if header.dst_port != self.port {
            tracing::debug!(src = %src_addr, dst_port = header.dst_port, "segment for another port dropped");
            self.stats.dropped_wrong_port += 1;
            return;
        }
        if self.config.verify_checksum {
            if let Err(e) = check_checksum(src_addr, dst_addr, &raw) {
                tracing::debug!(src = %src_addr, src_port = header.src_port, error = %e, "segment dropped");
                self.stats.dropped_checksum += 1;
                return;
            }
        }

        let id = ConnectionId::new(src_addr, header.src_port, dst_addr, header.dst_port);

        if header.flags.is_syn() {
            self.accept(id, header.seq);
            return;
        }

        let Some(conn) = self.registry.get_mut(&id) else {
            tracing::debug!(conn = %id, flags = %header.flags, "segment for unknown connection dropped");
            self.stats.dropped_unknown += 1;
            return;
        };

        conn.on_inbound_segment(header.seq, header.ack, header.flags, &segment.payload);

        if header.flags.is_fin() {
            conn.deliver_end_of_stream();
            conn.finish();
            flush(&mut self.network, conn);
            self.registry.remove(&id);
            self.stats.connections_closed += 1;
            tracing::debug!(conn = %id, "connection removed");
        } else {
            flush(&mut self.network, conn);
        }
    }

    fn accept(&mut self, id: ConnectionId, peer_seq: u32) {
        let conn = Connection::accept(id, peer_seq, &self.config, self.clock.clone());
        if self.registry.insert(conn).is_some() {
            tracing::debug!(conn = %id, "SYN replaced existing connection");
        }
        self.stats.connections_accepted += 1;
        tracing::debug!(conn = %id, peer_seq, "connection accepted");

        let Some(conn) = self.registry.get_mut(&id) else {
            return;
        };
        if let Some(mut callback) = self.on_accept.take() {
            callback(conn);
            self.on_accept = Some(callback);
        }
        flush(&mut self.network, conn);
    }

    // ─── Application access ─────────────────────────────────────────────

    /// Run `f` against a live connection and flush whatever it emitted.
    pub fn with_connection<R>(
        &mut self,
        id: &ConnectionId,
        f: impl FnOnce(&mut Connection) -> R,
    ) -> Option<R> {
        let conn = self.registry.get_mut(id)?;
        let result = f(conn);
        flush(&mut self.network, conn);
        Some(result)
    }

    /// Queue bytes on a connection.
    pub fn send(&mut self, id: &ConnectionId, data: &[u8]) -> TransportResult<usize> {
        self.with_connection(id, |conn| conn.send(data))
            .ok_or(TransportError::UnknownConnection(*id))?
    }

    /// Close a connection from the local side.
    pub fn close(&mut self, id: &ConnectionId) -> TransportResult<()> {
        self.with_connection(id, Connection::close)
            .ok_or(TransportError::UnknownConnection(*id))?
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.registry.get(id)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.registry.ids()
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    // ─── Timers ─────────────────────────────────────────────────────────

    /// Earliest armed retransmit deadline across all connections.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.registry.iter().filter_map(Connection::timer_deadline).min()
    }

    /// Fire every retransmit timer whose deadline has passed.
    pub fn handle_timeouts(&mut self) {
        let now = self.clock.now();
        for id in self.registry.ids() {
            let Some(conn) = self.registry.get_mut(&id) else {
                continue;
            };
            if conn.timer_deadline().is_some_and(|deadline| deadline <= now) {
                conn.handle_timeout(now);
                flush(&mut self.network, conn);
            }
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }
}

fn flush<N: Network>(network: &mut N, conn: &mut Connection) {
    for out in conn.drain_outbox() {
        network.send(out.segment, out.dst);
    }
}
