//! mlat-server: lifecycle host around the `mlat-core` coordination core.
//!
//! Owns the runtime concerns the core deliberately avoids: background
//! loops, atomic state-file dumps, the handshake log, signal handling,
//! and the process title. Wire protocols and the clock/position engines
//! attach through `mlat_core::hooks`.

pub mod handshake;
pub mod profile;
pub mod server;
pub mod state;

pub use handshake::HandshakeLog;
pub use profile::Profiler;
pub use state::StateWriter;
