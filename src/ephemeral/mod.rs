//! Ephemeral layer
//!
//! The validator-side mirror of delegated accounts. Writes apply to the
//! mirror's own copy immediately; durability on the base layer only comes
//! through scheduled commits.

pub mod mirror;

pub use mirror::{EphemeralMirror, MirroredAccount};
