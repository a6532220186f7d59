//! Connected-receiver record: identity, position, the four interest sets,
//! and the clock-quality counters.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use uuid::Uuid;

use crate::clock::ClockModel;
use crate::geodesy;
use crate::hooks::Connection;
use crate::types::{Icao, ReceiverId};

/// State for one authenticated receiver connection.
///
/// All aircraft references are by ICAO; the mirror sets live on
/// [`crate::tracker::TrackedAircraft`] and are kept symmetric by the
/// tracker's commit primitives.
pub struct Receiver {
    pub uid: ReceiverId,
    pub user: String,
    pub uuid: Option<Uuid>,
    pub connection: Arc<dyn Connection>,
    pub clock: ClockModel,
    /// Latitude (deg), longitude (deg), altitude (m).
    pub position_llh: (f64, f64, f64),
    pub position_ecef: [f64; 3],
    pub privacy: bool,
    pub connection_info: String,
    /// One-way false → true on disconnect.
    pub dead: bool,
    pub connected_since: Instant,
    pub last_clock_reset: Instant,
    pub clock_reset_counter: u32,

    pub sync_count: u64,
    /// Number of active sync peers, updated live by the sync engine.
    pub sync_peers: u32,
    /// Only refreshed while dumping state.
    pub peer_count: usize,
    pub last_rate_report: Option<HashMap<Icao, f64>>,

    pub tracking: HashSet<Icao>,
    pub adsb_seen: HashSet<Icao>,
    pub sync_interest: HashSet<Icao>,
    pub mlat_interest: HashSet<Icao>,
    pub requested: HashSet<Icao>,

    /// Distance in meters to every live receiver, self included (0).
    pub distance: HashMap<ReceiverId, f64>,

    /// Quarantine score in [0, 6]; receivers above 0 are not used for
    /// position calculation.
    pub bad_syncs: f64,
    pub sync_range_exceeded: u32,
    pub recent_pair_jumps: u32,
    pub recent_clock_jumps: f64,

    /// Fixed random offsets in [0, 0.05) blurring the dumped position.
    pub off_x: f64,
    pub off_y: f64,
}

impl Receiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uid: ReceiverId,
        user: String,
        uuid: Option<Uuid>,
        connection: Arc<dyn Connection>,
        clock: ClockModel,
        position_llh: (f64, f64, f64),
        privacy: bool,
        connection_info: String,
        rng: &mut impl Rng,
    ) -> Self {
        let now = Instant::now();
        Receiver {
            uid,
            user,
            uuid,
            connection,
            clock,
            position_llh,
            position_ecef: geodesy::llh2ecef(position_llh),
            privacy,
            connection_info,
            dead: false,
            connected_since: now,
            last_clock_reset: now,
            clock_reset_counter: 0,
            sync_count: 0,
            sync_peers: 0,
            peer_count: 0,
            last_rate_report: None,
            tracking: HashSet::new(),
            adsb_seen: HashSet::new(),
            sync_interest: HashSet::new(),
            mlat_interest: HashSet::new(),
            requested: HashSet::new(),
            distance: HashMap::new(),
            bad_syncs: 0.0,
            sync_range_exceeded: 0,
            recent_pair_jumps: 0,
            recent_clock_jumps: 0.0,
            off_x: rng.gen::<f64>() * 0.05,
            off_y: rng.gen::<f64>() * 0.05,
        }
    }

    /// Move to a new position and recompute the derived ECEF triple.
    /// Distance rows are recomputed by the registry.
    pub fn set_position(&mut self, position_llh: (f64, f64, f64)) {
        self.position_llh = position_llh;
        self.position_ecef = geodesy::llh2ecef(position_llh);
    }

    /// Record one pair anomaly reported by the sync engine. Returns true
    /// when enough of this receiver's pairings jumped that its clock
    /// state should be reset.
    pub fn note_pair_jump(&mut self) -> bool {
        self.recent_pair_jumps += 1;
        if self.sync_peers == 0 {
            // no peers: the ratio check does not apply
            return false;
        }
        if f64::from(self.recent_pair_jumps) / f64::from(self.sync_peers) > 0.2 {
            self.recent_clock_jumps += 1.0;
            if self.recent_clock_jumps > 2.0 {
                self.bad_syncs = (self.bad_syncs + 0.4).min(6.0);
            }
            return true;
        }
        false
    }

    /// Recompute the requested set as the union of sync and MLAT interest.
    pub fn refresh_requested(&mut self) -> &HashSet<Icao> {
        self.requested = self.sync_interest.union(&self.mlat_interest).copied().collect();
        &self.requested
    }
}
