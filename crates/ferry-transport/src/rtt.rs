//! # RTT Estimation
//!
//! Jacobson/Karels smoothing:
//!
//! ```text
//! first sample R:   SRTT = R,  RTTVAR = R/2
//! later samples:    SRTT   = 7/8·SRTT   + 1/8·R
//!                   RTTVAR = 3/4·RTTVAR + 1/4·|R − SRTT|   (updated SRTT)
//! RTO = SRTT + 4·RTTVAR, clamped to [min_rto, max_rto]
//! ```
//!
//! Before the first sample the fixed initial timeout is used. Samples from
//! retransmitted segments must never reach the estimator (Karn's algorithm);
//! the send buffer enforces that when it picks a sample.

use std::time::Duration;

use crate::config::TransportConfig;

/// Smoothed RTT / RTT variation / RTO estimator for one connection.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT, `None` until the first sample.
    srtt: Option<Duration>,
    /// RTT variation, `None` until the first sample.
    rttvar: Option<Duration>,
    /// Lowest sample seen.
    min_rtt: Option<Duration>,
    /// Most recent sample.
    latest: Option<Duration>,
    sample_count: u64,
    initial_rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
}

impl RttEstimator {
    pub fn new(initial_rto: Duration, min_rto: Duration, max_rto: Duration) -> Self {
        RttEstimator {
            srtt: None,
            rttvar: None,
            min_rtt: None,
            latest: None,
            sample_count: 0,
            initial_rto,
            min_rto,
            max_rto,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.initial_rto(), config.min_rto(), config.max_rto())
    }

    /// Feed one RTT measurement.
    pub fn on_sample(&mut self, sample: Duration) {
        self.sample_count += 1;
        self.latest = Some(sample);
        self.min_rtt = Some(self.min_rtt.map_or(sample, |m| m.min(sample)));

        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                // α = 1/8, β = 1/4; the deviation is taken against the new SRTT.
                let srtt = srtt * 7 / 8 + sample / 8;
                self.srtt = Some(srtt);
                self.rttvar = Some(rttvar * 3 / 4 + sample.abs_diff(srtt) / 4);
            }
            _ => {
                self.srtt = Some(sample);
                self.rttvar = Some(sample / 2);
            }
        }
    }

    /// Current retransmission timeout.
    pub fn retransmit_timeout(&self) -> Duration {
        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => (srtt + rttvar * 4).clamp(self.min_rto, self.max_rto),
            _ => self.initial_rto,
        }
    }

    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.srtt
    }

    pub fn rtt_deviation(&self) -> Option<Duration> {
        self.rttvar
    }

    pub fn min_rtt(&self) -> Option<Duration> {
        self.min_rtt
    }

    pub fn latest_rtt(&self) -> Option<Duration> {
        self.latest
    }

    /// Number of samples fed so far.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Whether at least one sample has been taken.
    pub fn has_samples(&self) -> bool {
        self.srtt.is_some()
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}
