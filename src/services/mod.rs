//! Long-lived services: the stream relay engine and the scheduled refresh
//! loop.

pub mod relay;
pub mod scheduler;

pub use relay::RelayManager;
