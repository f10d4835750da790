use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::relay::message::{Direction, RelayMessage};
use crate::relay::stats::RelayStats;
use crate::relay::utils::now_ms;

#[derive(Debug, Clone)]
pub struct InFlight {
    pub id: u64,
    pub message: RelayMessage,
    pub sent_at_ms: u128,
    pub deliver_after_ms: u128,
}

/// Cross-ledger transport.
///
/// Reliable-eventually: messages are never dropped, only held until their
/// propagation delay has elapsed. Delivery is FIFO per direction.
pub struct Relay {
    pub delegation_delay_ms: u64,
    pub commit_delay_ms: u64,
    pub to_ephemeral: VecDeque<InFlight>,
    pub to_base: VecDeque<InFlight>,
    next_id: u64,
    stats: RelayStats,
}

impl Relay {
    /// Constructor
    pub fn new(delegation_delay_ms: u64, commit_delay_ms: u64) -> Self {
        Relay {
            delegation_delay_ms,
            commit_delay_ms,
            to_ephemeral: VecDeque::new(),
            to_base: VecDeque::new(),
            next_id: 0,
            stats: RelayStats::default(),
        }
    }

    /// Zero-delay relay; everything is ready immediately
    pub fn immediate() -> Self {
        Self::new(0, 0)
    }

    /// Put a message in flight
    pub fn send(&mut self, message: RelayMessage) -> u64 {
        let now = now_ms();
        let delay = match message.direction() {
            Direction::ToEphemeral => self.delegation_delay_ms,
            Direction::ToBase => self.commit_delay_ms,
        };
        let id = self.next_id;
        self.next_id += 1;

        debug!("Relay: queued #{} {} for {}", id, message.kind(), message.address());
        let entry = InFlight {
            id,
            sent_at_ms: now,
            deliver_after_ms: now + delay as u128,
            message,
        };
        match entry.message.direction() {
            Direction::ToEphemeral => self.to_ephemeral.push_back(entry),
            Direction::ToBase => self.to_base.push_back(entry),
        }
        self.stats.messages_sent += 1;
        id
    }

    /// Pop every message in `direction` whose delay has elapsed at `now`
    pub fn drain_ready(&mut self, direction: Direction, now: u128) -> Vec<InFlight> {
        let queue = match direction {
            Direction::ToEphemeral => &mut self.to_ephemeral,
            Direction::ToBase => &mut self.to_base,
        };
        let mut ready = Vec::new();
        // Head-of-line: a later message never overtakes an earlier one
        while queue.front().map(|m| m.deliver_after_ms <= now).unwrap_or(false) {
            if let Some(entry) = queue.pop_front() {
                ready.push(entry);
            }
        }
        ready
    }

    /// Pop everything in `direction` regardless of delay
    pub fn drain_all(&mut self, direction: Direction) -> Vec<InFlight> {
        self.drain_ready(direction, u128::MAX)
    }

    pub fn mark_delivered(&mut self, entry: &InFlight) {
        self.stats.record_delivery(now_ms().saturating_sub(entry.sent_at_ms));
    }

    pub fn mark_failed(&mut self, entry: &InFlight, reason: &str) {
        warn!("Relay: #{} {} for {} failed: {}", entry.id, entry.message.kind(), entry.message.address(), reason);
        self.stats.messages_failed += 1;
    }

    pub fn is_idle(&self) -> bool {
        self.to_ephemeral.is_empty() && self.to_base.is_empty()
    }

    /// Get relay stats
    pub fn get_stats(&self) -> RelayStats {
        RelayStats {
            in_flight_to_ephemeral: self.to_ephemeral.len() as u64,
            in_flight_to_base: self.to_base.len() as u64,
            ..self.stats.clone()
        }
    }
}
