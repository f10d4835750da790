use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_failed: u64,
    pub in_flight_to_ephemeral: u64,
    pub in_flight_to_base: u64,
    pub avg_delivery_time_ms: f64,
}

impl RelayStats {
    /// Fold one delivery latency into the running average
    pub fn record_delivery(&mut self, latency_ms: u128) {
        let n = self.messages_delivered as f64;
        self.avg_delivery_time_ms = (self.avg_delivery_time_ms * n + latency_ms as f64) / (n + 1.0);
        self.messages_delivered += 1;
    }
}
