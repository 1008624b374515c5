//! Channel resolution: turns decoded playlist records into the published
//! channel table, rendered playlist and filtered guide.

pub mod provider;

pub use provider::{Lineup, Provider, Snapshot};
