//! # Transport Configuration
//!
//! Tunables shared by every connection a dispatcher creates. Loadable from
//! TOML; durations are expressed in milliseconds.
//!
//! ```toml
//! mss = 1000
//! initial_cwnd = 2
//! initial_rto_ms = 1000
//! verify_checksum = false
//! initial_sequence = 5000
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{TransportError, TransportResult};
use crate::segment::HEADER_LEN;

/// Per-dispatcher transport parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Maximum payload bytes per segment.
    pub mss: usize,
    /// Congestion window (in segments) of a fresh connection.
    pub initial_cwnd: u32,
    /// Upper bound for additive window growth.
    pub max_cwnd: u32,
    /// Retransmit timeout used before the first RTT sample.
    pub initial_rto_ms: u64,
    /// Lower clamp applied to the computed retransmit timeout.
    pub min_rto_ms: u64,
    /// Upper clamp applied to the computed retransmit timeout.
    pub max_rto_ms: u64,
    /// Drop inbound segments whose pseudo-header checksum fails.
    /// Tests disable this to inject hand-built segments.
    pub verify_checksum: bool,
    /// Fixed initial send sequence number; random when unset.
    pub initial_sequence: Option<u32>,
    /// Window value advertised in every outbound header.
    pub advertised_window: u16,
    /// Answer segments that lie before `recv_next` with a pure ACK. Off by
    /// default: duplicates are dropped without a reply.
    pub reack_duplicates: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            mss: 1000,
            initial_cwnd: 1,
            max_cwnd: u32::MAX,
            initial_rto_ms: 1000,
            min_rto_ms: 1,
            max_rto_ms: 60_000,
            verify_checksum: true,
            initial_sequence: None,
            advertised_window: u16::MAX,
            reack_duplicates: false,
        }
    }
}

impl TransportConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> TransportResult<Self> {
        let config: TransportConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> TransportResult<()> {
        if self.mss == 0 {
            return Err(TransportError::InvalidConfig("mss must be positive".into()));
        }
        if self.mss > u16::MAX as usize - HEADER_LEN {
            return Err(TransportError::InvalidConfig(format!(
                "mss {} exceeds the {}-byte segment limit",
                self.mss,
                u16::MAX as usize - HEADER_LEN
            )));
        }
        if self.initial_cwnd == 0 {
            return Err(TransportError::InvalidConfig(
                "initial_cwnd must be at least 1".into(),
            ));
        }
        if self.max_cwnd < self.initial_cwnd {
            return Err(TransportError::InvalidConfig(
                "max_cwnd must not be below initial_cwnd".into(),
            ));
        }
        if self.initial_rto_ms == 0 {
            return Err(TransportError::InvalidConfig(
                "initial_rto_ms must be positive".into(),
            ));
        }
        if self.min_rto_ms > self.max_rto_ms {
            return Err(TransportError::InvalidConfig(
                "min_rto_ms must not exceed max_rto_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn initial_rto(&self) -> Duration {
        Duration::from_millis(self.initial_rto_ms)
    }

    pub fn min_rto(&self) -> Duration {
        Duration::from_millis(self.min_rto_ms)
    }

    pub fn max_rto(&self) -> Duration {
        Duration::from_millis(self.max_rto_ms)
    }

    pub fn with_mss(mut self, mss: usize) -> Self {
        self.mss = mss;
        self
    }

    pub fn with_initial_cwnd(mut self, cwnd: u32) -> Self {
        self.initial_cwnd = cwnd;
        self
    }

    pub fn with_initial_rto(mut self, rto: Duration) -> Self {
        self.initial_rto_ms = rto.as_millis() as u64;
        self
    }

    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub fn with_initial_sequence(mut self, seq: u32) -> Self {
        self.initial_sequence = Some(seq);
        self
    }

    pub fn with_reack_duplicates(mut self, reack: bool) -> Self {
        self.reack_duplicates = reack;
        self
    }
}
