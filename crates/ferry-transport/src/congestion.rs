//! # Congestion Window
//!
//! Segment-counting window with a deliberately crude policy:
//!
//! ```text
//!   flight fully acknowledged ──▶ cwnd += 1   (capped at max_cwnd)
//!   retransmit timeout        ──▶ cwnd /= 2   (floored at 1)
//! ```
//!
//! There is no slow start, no ssthresh and no fast recovery.

use crate::config::TransportConfig;

/// Maximum number of unacknowledged segments allowed in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CongestionWindow {
    cwnd: u32,
    max_cwnd: u32,
    /// Number of halvings since creation.
    loss_events: u64,
}

impl CongestionWindow {
    pub fn new(initial: u32, max_cwnd: u32) -> Self {
        let initial = initial.max(1);
        CongestionWindow {
            cwnd: initial,
            max_cwnd: max_cwnd.max(initial),
            loss_events: 0,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.initial_cwnd, config.max_cwnd)
    }

    /// Current window in segments.
    #[inline]
    pub fn get(&self) -> u32 {
        self.cwnd
    }

    /// Whether another segment may enter flight.
    #[inline]
    pub fn allows(&self, in_flight: usize) -> bool {
        in_flight < self.cwnd as usize
    }

    /// Every outstanding segment was acknowledged.
    pub fn on_flight_cleared(&mut self) {
        self.cwnd = self.cwnd.saturating_add(1).min(self.max_cwnd);
    }

    /// A retransmission timer fired.
    pub fn on_timeout(&mut self) {
        self.cwnd = (self.cwnd / 2).max(1);
        self.loss_events += 1;
    }

    pub fn loss_events(&self) -> u64 {
        self.loss_events
    }
}

impl Default for CongestionWindow {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_one_when_flight_clears() {
        let mut cw = CongestionWindow::new(2, 10);
        cw.on_flight_cleared();
        assert_eq!(cw.get(), 3);
    }

    #[test]
    fn growth_respects_cap() {
        let mut cw = CongestionWindow::new(3, 3);
        cw.on_flight_cleared();
        assert_eq!(cw.get(), 3);
    }

    #[test]
    fn timeout_halves_with_floor() {
        let mut cw = CongestionWindow::new(5, 100);
        cw.on_timeout();
        assert_eq!(cw.get(), 2);
        cw.on_timeout();
        assert_eq!(cw.get(), 1);
        cw.on_timeout();
        assert_eq!(cw.get(), 1);
        assert_eq!(cw.loss_events(), 3);
    }

    #[test]
    fn zero_initial_window_is_raised_to_one() {
        let cw = CongestionWindow::new(0, 0);
        assert_eq!(cw.get(), 1);
        assert!(cw.allows(0));
        assert!(!cw.allows(1));
    }
}
