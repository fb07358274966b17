//! # Transport Statistics
//!
//! Per-connection and per-dispatcher counters. Serializable for JSON export
//! by the simulation runner.

use serde::Serialize;

// ─── Connection Stats ───────────────────────────────────────────────────────

/// Counters for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Segments emitted (handshake, data, pure ACKs, FIN, retransmissions).
    pub segments_sent: u64,
    /// Original payload bytes admitted into flight.
    pub bytes_sent: u64,
    /// Data segments resent after a timeout.
    pub retransmissions: u64,
    /// Retransmit timer fires.
    pub timeouts: u64,
    /// RTT samples fed to the estimator.
    pub rtt_samples: u64,
    /// Inbound segments handed to the connection.
    pub segments_received: u64,
    /// Payload bytes delivered to the application.
    pub bytes_delivered: u64,
    /// Payload segments lying entirely before `recv_next`.
    pub duplicates: u64,
    /// Payload segments beyond `recv_next` (dropped, no reordering buffer).
    pub out_of_order: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retransmissions per original data segment.
    pub fn retransmit_ratio(&self, data_segments: u64) -> f64 {
        if data_segments == 0 {
            0.0
        } else {
            self.retransmissions as f64 / data_segments as f64
        }
    }
}

// ─── Dispatcher Stats ───────────────────────────────────────────────────────

/// Counters for the demultiplexer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Raw segments handed in by the substrate.
    pub segments_received: u64,
    /// Segments addressed to another port.
    pub dropped_wrong_port: u64,
    /// Segments failing checksum verification.
    pub dropped_checksum: u64,
    /// Segments too short or with an invalid data offset.
    pub dropped_malformed: u64,
    /// Non-SYN segments for a 4-tuple with no connection.
    pub dropped_unknown: u64,
    /// Connections created from a SYN.
    pub connections_accepted: u64,
    /// Connections removed after the peer's FIN.
    pub connections_closed: u64,
}

impl DispatcherStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total segments discarded before reaching a connection.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_wrong_port
            + self.dropped_checksum
            + self.dropped_malformed
            + self.dropped_unknown
    }
}
