//! One-way impaired link.
//!
//! Packets pushed into a [`Link`] are subjected, in order, to loss,
//! corruption, delay with jitter, reordering and duplication, then held in a
//! time-ordered queue until the simulation clock reaches their delivery
//! instant. All randomness comes from a seeded [`StdRng`], so a link replays
//! identically for the same seed and input.

use bytes::Bytes;
use quanta::Instant;
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::net::IpAddr;
use std::time::Duration;

/// Impairment parameters for one direction. Percentages are in `0.0..=100.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkImpairment {
    pub delay_ms: u32,
    /// Uniform jitter added on top of `delay_ms`.
    pub jitter_ms: u32,
    pub loss_percent: f32,
    pub duplicate_percent: f32,
    /// Share of packets held back by `reorder_extra_ms`.
    pub reorder_percent: f32,
    pub reorder_extra_ms: u32,
    /// Share of packets with one bit flipped.
    pub corrupt_percent: f32,
}

impl Default for LinkImpairment {
    fn default() -> Self {
        LinkImpairment {
            delay_ms: 10,
            jitter_ms: 0,
            loss_percent: 0.0,
            duplicate_percent: 0.0,
            reorder_percent: 0.0,
            reorder_extra_ms: 20,
            corrupt_percent: 0.0,
        }
    }
}

impl LinkImpairment {
    /// A lossless link with the given one-way delay.
    pub fn clean(delay_ms: u32) -> Self {
        LinkImpairment {
            delay_ms,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, pct) in [
            ("loss_percent", self.loss_percent),
            ("duplicate_percent", self.duplicate_percent),
            ("reorder_percent", self.reorder_percent),
            ("corrupt_percent", self.corrupt_percent),
        ] {
            anyhow::ensure!(
                (0.0..=100.0).contains(&pct),
                "{name} must be within 0..=100, got {pct}"
            );
        }
        Ok(())
    }
}

/// Per-link counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub pushed: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub corrupted: u64,
    pub delivered: u64,
}

/// A packet in transit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub data: Bytes,
}

#[derive(Debug)]
struct Scheduled {
    at: Instant,
    /// Tie-breaker keeping FIFO order among equal instants.
    order: u64,
    packet: Packet,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: BinaryHeap is a max-heap and we want the earliest first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.order.cmp(&self.order))
    }
}

#[derive(Debug)]
pub struct Link {
    impairment: LinkImpairment,
    rng: StdRng,
    queue: BinaryHeap<Scheduled>,
    next_order: u64,
    stats: LinkStats,
}

impl Link {
    pub fn new(impairment: LinkImpairment, seed: u64) -> Self {
        Link {
            impairment,
            rng: StdRng::seed_from_u64(seed),
            queue: BinaryHeap::new(),
            next_order: 0,
            stats: LinkStats::default(),
        }
    }

    /// Put a packet on the link at `now`.
    pub fn push(&mut self, now: Instant, packet: Packet) {
        self.stats.pushed += 1;

        if self.chance(self.impairment.loss_percent) {
            self.stats.dropped += 1;
            tracing::trace!(dst = %packet.dst, len = packet.data.len(), "link drop");
            return;
        }

        let packet = if self.chance(self.impairment.corrupt_percent) {
            self.stats.corrupted += 1;
            self.corrupt(packet)
        } else {
            packet
        };

        if self.chance(self.impairment.duplicate_percent) {
            self.stats.duplicated += 1;
            self.schedule(now, packet.clone());
        }
        self.schedule(now, packet);
    }

    /// Pop the next packet whose delivery instant is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Packet> {
        if self.queue.peek()?.at > now {
            return None;
        }
        let scheduled = self.queue.pop()?;
        self.stats.delivered += 1;
        Some(scheduled.packet)
    }

    /// Delivery instant of the earliest queued packet.
    pub fn next_delivery(&self) -> Option<Instant> {
        self.queue.peek().map(|s| s.at)
    }

    pub fn in_transit(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    fn schedule(&mut self, now: Instant, packet: Packet) {
        let mut delay_ms = self.impairment.delay_ms;
        if self.impairment.jitter_ms > 0 {
            delay_ms += self.rng.random_range(0..=self.impairment.jitter_ms);
        }
        if self.chance(self.impairment.reorder_percent) {
            self.stats.reordered += 1;
            delay_ms += self.impairment.reorder_extra_ms;
        }

        let order = self.next_order;
        self.next_order += 1;
        self.queue.push(Scheduled {
            at: now + Duration::from_millis(delay_ms as u64),
            order,
            packet,
        });
    }

    fn corrupt(&mut self, packet: Packet) -> Packet {
        if packet.data.is_empty() {
            return packet;
        }
        let mut data = packet.data.to_vec();
        let bit = self.rng.random_range(0..data.len() * 8);
        data[bit / 8] ^= 1 << (bit % 8);
        Packet {
            data: Bytes::from(data),
            ..packet
        }
    }

    fn chance(&mut self, percent: f32) -> bool {
        percent > 0.0 && self.rng.random::<f64>() * 100.0 < percent as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quanta::Clock;
    use std::net::Ipv4Addr;

    fn packet(tag: u8) -> Packet {
        Packet {
            src: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            data: Bytes::from(vec![tag; 8]),
        }
    }

    fn drain(link: &mut Link, now: Instant) -> Vec<Packet> {
        std::iter::from_fn(|| link.pop_due(now)).collect()
    }

    #[test]
    fn clean_link_delays_and_preserves_order() {
        let (clock, mock) = Clock::mock();
        let mut link = Link::new(LinkImpairment::clean(30), 1);
        for tag in 0..5 {
            link.push(clock.now(), packet(tag));
        }

        assert!(drain(&mut link, clock.now()).is_empty());
        assert_eq!(
            link.next_delivery(),
            Some(clock.now() + Duration::from_millis(30))
        );

        mock.increment(Duration::from_millis(30));
        let out = drain(&mut link, clock.now());
        let tags: Vec<u8> = out.iter().map(|p| p.data[0]).collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4]);
        assert_eq!(link.stats().delivered, 5);
    }

    #[test]
    fn full_loss_drops_everything() {
        let (clock, mock) = Clock::mock();
        let impairment = LinkImpairment {
            loss_percent: 100.0,
            ..LinkImpairment::clean(0)
        };
        let mut link = Link::new(impairment, 7);
        for tag in 0..10 {
            link.push(clock.now(), packet(tag));
        }
        mock.increment(Duration::from_secs(1));
        assert!(drain(&mut link, clock.now()).is_empty());
        assert_eq!(link.stats().dropped, 10);
    }

    #[test]
    fn full_duplication_doubles() {
        let (clock, _mock) = Clock::mock();
        let impairment = LinkImpairment {
            duplicate_percent: 100.0,
            ..LinkImpairment::clean(0)
        };
        let mut link = Link::new(impairment, 7);
        link.push(clock.now(), packet(1));
        assert_eq!(drain(&mut link, clock.now()).len(), 2);
    }

    #[test]
    fn corruption_flips_exactly_one_bit() {
        let (clock, _mock) = Clock::mock();
        let impairment = LinkImpairment {
            corrupt_percent: 100.0,
            ..LinkImpairment::clean(0)
        };
        let mut link = Link::new(impairment, 3);
        let original = packet(0xAA);
        link.push(clock.now(), original.clone());

        let out = drain(&mut link, clock.now());
        let flipped: u32 = original
            .data
            .iter()
            .zip(out[0].data.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        assert_eq!(flipped, 1);
    }

    #[test]
    fn reordering_holds_packets_back() {
        let (clock, mock) = Clock::mock();
        let impairment = LinkImpairment {
            reorder_percent: 100.0,
            reorder_extra_ms: 50,
            ..LinkImpairment::clean(10)
        };
        let mut link = Link::new(impairment, 9);
        link.push(clock.now(), packet(1));

        mock.increment(Duration::from_millis(10));
        assert!(drain(&mut link, clock.now()).is_empty());
        mock.increment(Duration::from_millis(50));
        assert_eq!(drain(&mut link, clock.now()).len(), 1);
    }

    #[test]
    fn same_seed_replays_identically() {
        let impairment = LinkImpairment {
            loss_percent: 30.0,
            jitter_ms: 15,
            duplicate_percent: 10.0,
            ..LinkImpairment::clean(5)
        };
        let run = || {
            let (clock, mock) = Clock::mock();
            let mut link = Link::new(impairment.clone(), 1234);
            for tag in 0..50 {
                link.push(clock.now(), packet(tag));
            }
            mock.increment(Duration::from_secs(1));
            drain(&mut link, clock.now())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn validation_rejects_bad_percentages() {
        let bad = LinkImpairment {
            loss_percent: 120.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(LinkImpairment::default().validate().is_ok());
    }
}
