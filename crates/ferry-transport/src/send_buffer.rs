//! # Send Buffer
//!
//! Ordered record of every segment that has been transmitted but not yet
//! cumulatively acknowledged. Records are kept in sequence order and cover
//! `[oldest_unacked, send_next)` without gaps, so cumulative acknowledgment
//! always removes a prefix.

use bytes::Bytes;
use quanta::Instant;
use std::collections::VecDeque;
use std::time::Duration;

use crate::seq::{seq_add, seq_le};

// ─── UnackedSegment ─────────────────────────────────────────────────────────

/// One in-flight segment.
#[derive(Debug, Clone)]
pub struct UnackedSegment {
    /// Sequence number of the first payload byte.
    pub start: u32,
    pub payload: Bytes,
    /// When the segment was last put on the wire.
    pub sent_at: Instant,
    /// Set once the segment has been resent; such segments never yield RTT
    /// samples.
    pub retransmitted: bool,
}

impl UnackedSegment {
    pub fn new(start: u32, payload: Bytes, sent_at: Instant) -> Self {
        UnackedSegment {
            start,
            payload,
            sent_at,
            retransmitted: false,
        }
    }

    /// Sequence number one past the last payload byte.
    #[inline]
    pub fn end(&self) -> u32 {
        seq_add(self.start, self.payload.len())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

// ─── SendBuffer ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SendBuffer {
    segments: VecDeque<UnackedSegment>,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a freshly transmitted segment at the tail.
    pub fn push(&mut self, segment: UnackedSegment) {
        debug_assert!(
            self.segments
                .back()
                .map_or(true, |last| last.end() == segment.start),
            "send buffer must stay contiguous"
        );
        self.segments.push_back(segment);
    }

    /// The segment the retransmit timer is guarding.
    pub fn oldest(&self) -> Option<&UnackedSegment> {
        self.segments.front()
    }

    pub fn oldest_mut(&mut self) -> Option<&mut UnackedSegment> {
        self.segments.front_mut()
    }

    /// RTT sample for a cumulative `ack`: time since the earliest segment
    /// that ends exactly at `ack` was sent, provided it was never resent.
    pub fn rtt_sample_for(&self, ack: u32, now: Instant) -> Option<Duration> {
        self.segments
            .iter()
            .find(|s| s.end() == ack && !s.retransmitted)
            .map(|s| now.saturating_duration_since(s.sent_at))
    }

    /// Remove every segment that ends at or before `ack`.
    /// Returns the number removed.
    pub fn pop_covered(&mut self, ack: u32) -> usize {
        let mut removed = 0;
        while self
            .segments
            .front()
            .is_some_and(|s| seq_le(s.end(), ack))
        {
            self.segments.pop_front();
            removed += 1;
        }
        removed
    }

    /// Whether any in-flight segment has been resent.
    pub fn has_retransmitted(&self) -> bool {
        self.segments.iter().any(|s| s.retransmitted)
    }

    /// Payload bytes currently in flight.
    pub fn bytes_in_flight(&self) -> usize {
        self.segments.iter().map(UnackedSegment::len).sum()
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnackedSegment> {
        self.segments.iter()
    }
}
