//! Capability traits at the seams of the coordination core.
//!
//! The per-receiver connection, the clock-sync pairing engine, and the
//! position solver all live outside this crate. They are modeled as trait
//! objects so the coordinator can be driven by real implementations in
//! production and by recording mocks in tests.

use std::collections::{HashMap, HashSet};

use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};

use crate::receiver::Receiver;
use crate::types::{Icao, KalmanState, ReceiverId, ResultScratch};

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Output channel for one connected receiver.
///
/// Implementations queue their own I/O; both methods must return without
/// blocking the coordination thread.
pub trait Connection: Send + Sync {
    /// Ask the client to forward traffic for exactly this ICAO set.
    fn request_traffic(&self, receiver: ReceiverId, icao_set: &HashSet<Icao>);

    /// Deliver a solved position to the client.
    #[allow(clippy::too_many_arguments)]
    fn report_mlat_position(
        &self,
        receiver: ReceiverId,
        receive_timestamp: f64,
        icao: Icao,
        ecef: [f64; 3],
        ecef_cov: Option<[[f64; 3]; 3]>,
        contributors: &[ReceiverId],
        distinct: usize,
        dof: i32,
        kalman_state: &KalmanState,
        scratch: &mut ResultScratch,
    ) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Clock-sync engine
// ---------------------------------------------------------------------------

/// Per-pair synchronization statistics exported by the sync engine.
///
/// Serializes as the 5-element array `[sync_count, offset_us, drift_ppm,
/// bad_syncs, jumped]` that the sync.json consumers expect.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeerStats {
    pub sync_count: u32,
    pub offset_us: f64,
    pub drift_ppm: f64,
    pub bad_syncs: f64,
    pub jumped: u32,
}

impl Serialize for PeerStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(5)?;
        tuple.serialize_element(&self.sync_count)?;
        tuple.serialize_element(&self.offset_us)?;
        tuple.serialize_element(&self.drift_ppm)?;
        tuple.serialize_element(&self.bad_syncs)?;
        tuple.serialize_element(&self.jumped)?;
        tuple.end()
    }
}

/// `user → peer_user → stats` for every live receiver pair.
pub type ReceiverSyncState = HashMap<String, HashMap<String, PeerStats>>;

/// The external clock-synchronization pairing engine.
pub trait ClockTracker: Send {
    /// Drop all pairings involving this receiver.
    fn receiver_disconnect(&mut self, receiver: ReceiverId);

    /// Discard the receiver's current clock state after an anomaly.
    fn receiver_clock_reset(&mut self, receiver: ReceiverId);

    /// Feed one even/odd DF17 pair observed by a receiver.
    fn receiver_sync(
        &mut self,
        receiver: ReceiverId,
        even_time: f64,
        odd_time: f64,
        even_message: &[u8],
        odd_message: &[u8],
    );

    /// Export per-pair statistics for scoring and the sync.json dump.
    fn dump_receiver_state(&self) -> ReceiverSyncState;
}

/// The external position solver.
pub trait MlatTracker: Send {
    /// Feed one Mode S message copy for multilateration.
    fn receiver_mlat(&mut self, receiver: ReceiverId, timestamp: f64, message: &[u8], utc: f64);
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Admission check run against a fully built (but not yet registered)
/// receiver and the opaque auth blob from the handshake. Returning an
/// error rejects the connection; no registry state is retained.
pub type Authenticator =
    Box<dyn Fn(&Receiver, &str) -> std::result::Result<(), String> + Send + Sync>;

// ---------------------------------------------------------------------------
// Null engines
// ---------------------------------------------------------------------------

/// Clock tracker that pairs nothing. Used when the sync engine runs out
/// of process and only the coordination graph is hosted here.
#[derive(Debug, Default)]
pub struct NullClockTracker;

impl ClockTracker for NullClockTracker {
    fn receiver_disconnect(&mut self, _receiver: ReceiverId) {}
    fn receiver_clock_reset(&mut self, _receiver: ReceiverId) {}
    fn receiver_sync(
        &mut self,
        _receiver: ReceiverId,
        _even_time: f64,
        _odd_time: f64,
        _even_message: &[u8],
        _odd_message: &[u8],
    ) {
    }
    fn dump_receiver_state(&self) -> ReceiverSyncState {
        ReceiverSyncState::new()
    }
}

/// Position solver that drops everything, for the same deployments.
#[derive(Debug, Default)]
pub struct NullMlatTracker;

impl MlatTracker for NullMlatTracker {
    fn receiver_mlat(&mut self, _receiver: ReceiverId, _timestamp: f64, _message: &[u8], _utc: f64) {
    }
}
