// src/relay/mod.rs

pub mod message;
pub mod queue;
pub mod stats;
pub mod utils;

// Re-export commonly used types so callers can `use relay::...`
pub use message::{Direction, RelayMessage};
pub use queue::{InFlight, Relay};
pub use stats::RelayStats;
pub use utils::now_ms;
