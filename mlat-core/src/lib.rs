//! mlat-core: coordination core for a Mode S multilateration server.
//!
//! No I/O — just the receiver/aircraft interest graph and its policies.
//! The embedding server (`mlat-server`) owns the event loop, the wire
//! protocol, and the periodic state dumps; the clock-sync and position
//! solving engines plug in through the traits in [`hooks`].

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod geodesy;
pub mod hooks;
pub mod receiver;
pub mod snapshot;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types at crate root
pub use config::SelectorConfig;
pub use coordinator::Coordinator;
pub use hooks::{ClockTracker, Connection, MlatTracker, PeerStats};
pub use receiver::Receiver;
pub use snapshot::StateSnapshot;
pub use tracker::{TrackedAircraft, Tracker};
pub use types::*;
