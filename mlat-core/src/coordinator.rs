//! Top-level glue that knows about all receivers and moves data between
//! the registries, the interest selector, and the external engines.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::warn;
use uuid::Uuid;

use crate::clock::make_clock;
use crate::config::SelectorConfig;
use crate::geodesy::{self, MTOF};
use crate::hooks::{Authenticator, ClockTracker, Connection, MlatTracker, ReceiverSyncState};
use crate::receiver::Receiver;
use crate::snapshot::{round_dp, AircraftEntry, LocationEntry, StateSnapshot, SyncEntry};
use crate::tracker::Tracker;
use crate::types::{
    icao_to_string, Icao, KalmanState, MlatError, ReceiverId, Result, ResultScratch,
};

/// Receiver uids wrap here and probe forward past ids still in use.
const UID_WRAP: u64 = 1 << 62;

/// Master coordinator. Receives all messages from receivers and dispatches
/// them to clock sync / multilateration / tracking as needed.
///
/// Not a hidden global: the embedding server owns exactly one and passes
/// it wherever it is needed. All mutation happens under that single owner,
/// so the bipartite graph is never observably asymmetric.
pub struct Coordinator {
    receivers: HashMap<ReceiverId, Receiver>,
    usernames: HashMap<String, ReceiverId>,
    uid_counter: u64,
    pub tracker: Tracker,
    authenticator: Option<Authenticator>,
    clock_tracker: Box<dyn ClockTracker>,
    mlat_tracker: Box<dyn MlatTracker>,
    /// Receivers whose traffic request needs to be retransmitted.
    /// Populated by interest updates, drained once per inbound batch.
    pending_refresh: HashSet<ReceiverId>,
    reload_handlers: Vec<(usize, Box<dyn Fn() + Send + Sync>)>,
    reload_handler_seq: usize,
    rng: StdRng,
}

impl Coordinator {
    /// `partition` is `(index, count)` with `1 <= index <= count`.
    pub fn new(
        partition: (u32, u32),
        config: SelectorConfig,
        clock_tracker: Box<dyn ClockTracker>,
        mlat_tracker: Box<dyn MlatTracker>,
        authenticator: Option<Authenticator>,
    ) -> Self {
        Coordinator {
            receivers: HashMap::new(),
            usernames: HashMap::new(),
            uid_counter: 0,
            tracker: Tracker::new(partition, config),
            authenticator,
            clock_tracker,
            mlat_tracker,
            pending_refresh: HashSet::new(),
            reload_handlers: Vec::new(),
            reload_handler_seq: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Wall-clock seconds since the epoch, the `now` the server layer
    /// passes into the time-sensitive entry points.
    pub fn unix_time() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64())
    }

    // -----------------------------------------------------------------
    // Receiver registry
    // -----------------------------------------------------------------

    /// Register a new receiver. Fails when the user name is taken or the
    /// authenticator rejects the handshake; no state is retained then.
    #[allow(clippy::too_many_arguments)]
    pub fn new_receiver(
        &mut self,
        connection: Arc<dyn Connection>,
        uuid: Option<Uuid>,
        user: &str,
        auth: &str,
        position_llh: (f64, f64, f64),
        clock_type: &str,
        privacy: bool,
        connection_info: &str,
    ) -> Result<ReceiverId> {
        if self.usernames.contains_key(user) {
            return Err(MlatError::DuplicateUser(user.to_string()));
        }

        if self.uid_counter > UID_WRAP {
            self.uid_counter = 0;
        }
        let mut uid = self.uid_counter;
        while self.receivers.contains_key(&uid) {
            self.uid_counter += 1;
            uid = self.uid_counter;
        }

        let clock = make_clock(clock_type);
        let mut receiver = Receiver::new(
            uid,
            user.to_string(),
            uuid,
            connection,
            clock,
            position_llh,
            privacy,
            connection_info.to_string(),
            &mut self.rng,
        );

        if let Some(authenticator) = &self.authenticator {
            authenticator(&receiver, auth).map_err(MlatError::AuthRejected)?;
        }

        Self::compute_interstation_distances(&mut self.receivers, &mut receiver);
        self.receivers.insert(uid, receiver);
        self.usernames.insert(user.to_string(), uid);
        Ok(uid)
    }

    /// Fill in distances between `receiver` (not yet, or no longer, in the
    /// map) and every registered receiver, both directions plus self = 0.
    fn compute_interstation_distances(
        receivers: &mut HashMap<ReceiverId, Receiver>,
        receiver: &mut Receiver,
    ) {
        receiver.distance.insert(receiver.uid, 0.0);
        for other in receivers.values_mut() {
            let distance = geodesy::ecef_distance(receiver.position_ecef, other.position_ecef);
            receiver.distance.insert(other.uid, distance);
            other.distance.insert(receiver.uid, distance);
        }
    }

    /// Note that a given receiver has moved.
    pub fn receiver_location_update(&mut self, uid: ReceiverId, position_llh: (f64, f64, f64)) {
        let Some(mut receiver) = self.receivers.remove(&uid) else {
            return;
        };
        receiver.set_position(position_llh);
        Self::compute_interstation_distances(&mut self.receivers, &mut receiver);
        self.receivers.insert(uid, receiver);
    }

    /// Note that the given receiver has disconnected. Purges it from the
    /// graph, both name/uid indices, and every peer's distance map.
    pub fn receiver_disconnect(&mut self, uid: ReceiverId) {
        let Some(mut receiver) = self.receivers.remove(&uid) else {
            return;
        };
        receiver.dead = true;
        self.tracker.remove_all(&mut receiver);
        self.clock_tracker.receiver_disconnect(uid);
        self.usernames.remove(&receiver.user);
        self.pending_refresh.remove(&uid);
        for other in self.receivers.values_mut() {
            other.distance.remove(&uid);
        }
    }

    // -----------------------------------------------------------------
    // Tracking and rate reports
    // -----------------------------------------------------------------

    /// Update a receiver's tracking set by adding some aircraft.
    pub fn receiver_tracking_add(&mut self, uid: ReceiverId, icao_set: &HashSet<Icao>, now: f64) {
        let Some(mut receiver) = self.receivers.remove(&uid) else {
            return;
        };
        self.tracker.add(&mut receiver, icao_set, now, &mut self.rng);
        if receiver.last_rate_report.is_none() {
            // not receiving rate reports for this receiver
            self.tracker
                .update_interest(&mut receiver, &self.receivers, now, &mut self.rng);
            self.pending_refresh.insert(uid);
        }
        self.receivers.insert(uid, receiver);
    }

    /// Update a receiver's tracking set by removing some aircraft.
    pub fn receiver_tracking_remove(
        &mut self,
        uid: ReceiverId,
        icao_set: &HashSet<Icao>,
        now: f64,
    ) {
        let Some(mut receiver) = self.receivers.remove(&uid) else {
            return;
        };
        self.tracker.remove(&mut receiver, icao_set);
        if receiver.last_rate_report.is_none() {
            self.tracker
                .update_interest(&mut receiver, &self.receivers, now, &mut self.rng);
            self.pending_refresh.insert(uid);
        }
        self.receivers.insert(uid, receiver);
    }

    /// Process an ADS-B message-rate report for a receiver.
    pub fn receiver_rate_report(
        &mut self,
        uid: ReceiverId,
        report: HashMap<Icao, f64>,
        now: f64,
    ) {
        let Some(mut receiver) = self.receivers.remove(&uid) else {
            return;
        };
        receiver.last_rate_report = Some(report);
        self.tracker
            .update_interest(&mut receiver, &self.receivers, now, &mut self.rng);
        self.pending_refresh.insert(uid);
        self.receivers.insert(uid, receiver);
    }

    /// Retransmit traffic requests for every receiver whose interest sets
    /// changed since the last drain. Rapid-fire updates within one batch
    /// collapse into a single request per receiver.
    pub fn drain_traffic_requests(&mut self) {
        let pending: Vec<ReceiverId> = self.pending_refresh.drain().collect();
        for uid in pending {
            if let Some(receiver) = self.receivers.get_mut(&uid) {
                let connection = receiver.connection.clone();
                receiver.refresh_requested();
                connection.request_traffic(uid, &receiver.requested);
            }
        }
    }

    // -----------------------------------------------------------------
    // Delegation to the external engines
    // -----------------------------------------------------------------

    /// Feed one even/odd sync pair to the clock tracker.
    pub fn receiver_sync(
        &mut self,
        uid: ReceiverId,
        even_time: f64,
        odd_time: f64,
        even_message: &[u8],
        odd_message: &[u8],
    ) {
        self.clock_tracker
            .receiver_sync(uid, even_time, odd_time, even_message, odd_message);
    }

    /// Feed one Mode S message copy to the position solver.
    pub fn receiver_mlat(&mut self, uid: ReceiverId, timestamp: f64, message: &[u8], utc: f64) {
        self.mlat_tracker.receiver_mlat(uid, timestamp, message, utc);
    }

    // -----------------------------------------------------------------
    // Clock anomalies
    // -----------------------------------------------------------------

    /// Called by the clock tracker when a pair anomaly is detected.
    pub fn increment_jumps(&mut self, uid: ReceiverId) {
        let needs_reset = self
            .receivers
            .get_mut(&uid)
            .is_some_and(Receiver::note_pair_jump);
        if needs_reset {
            self.clock_reset(uid);
        }
    }

    /// Reset current clock synchronization for a receiver.
    pub fn clock_reset(&mut self, uid: ReceiverId) {
        self.clock_tracker.receiver_clock_reset(uid);
        if let Some(receiver) = self.receivers.get_mut(&uid) {
            receiver.last_clock_reset = Instant::now();
            receiver.clock_reset_counter += 1;
            // throttle the noise from receivers that reset constantly
            if receiver.clock_reset_counter < 130 && receiver.clock_reset_counter % 30 == 5 {
                warn!(
                    user = %receiver.user,
                    count = receiver.clock_reset_counter,
                    "clock reset"
                );
            }
        }
    }

    // -----------------------------------------------------------------
    // Result fan-out
    // -----------------------------------------------------------------

    /// Dispatch a solved position to every contributing receiver. One
    /// receiver's failure never reaches the others or the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn forward_results(
        &self,
        receive_timestamp: f64,
        icao: Icao,
        ecef: [f64; 3],
        ecef_cov: Option<[[f64; 3]; 3]>,
        receivers: &[ReceiverId],
        distinct: usize,
        dof: i32,
        kalman_state: &KalmanState,
    ) {
        // a 3-receiver solution the filter hasn't locked onto is noise
        if !kalman_state.valid && dof < 1 {
            return;
        }

        let mut scratch = ResultScratch::default();
        for &uid in receivers {
            let Some(receiver) = self.receivers.get(&uid) else {
                continue;
            };
            if let Err(error) = receiver.connection.report_mlat_position(
                uid,
                receive_timestamp,
                icao,
                ecef,
                ecef_cov,
                receivers,
                distinct,
                dof,
                kalman_state,
                &mut scratch,
            ) {
                warn!(user = %receiver.user, %error, "failed to forward result");
            }
        }
    }

    // -----------------------------------------------------------------
    // Periodic scoring and state snapshot
    // -----------------------------------------------------------------

    /// Build the three dump documents. Also runs the clock-quality pass,
    /// which is tied to the same 15-second cadence.
    pub fn build_snapshot(&mut self, now: f64) -> StateSnapshot {
        let receiver_states = self.clock_tracker.dump_receiver_state();
        self.score_clock_quality(&receiver_states);

        let mut aircraft = HashMap::with_capacity(self.tracker.aircraft.len());
        let mut mlat_count = 0;
        let mut sync_count = 0;

        for ac in self.tracker.aircraft.values() {
            let mut entry = AircraftEntry {
                interesting: u8::from(ac.interesting()),
                allow_mlat: u8::from(ac.allow_mlat),
                tracking: ac.tracking.len(),
                sync_interest: ac.sync_interest.len(),
                mlat_interest: ac.mlat_interest.len(),
                adsb_seen: ac.adsb_seen.len(),
                mlat_message_count: ac.mlat_message_count,
                mlat_result_count: ac.mlat_result_count,
                mlat_kalman_count: ac.mlat_kalman_count,
                last_result: None,
                lat: None,
                lon: None,
                alt: None,
                heading: None,
                speed: None,
            };

            if let (Some(last_result_time), true) = (ac.last_result_time, ac.kalman.valid) {
                let (lat, lon, alt) = ac.kalman.position_llh;
                entry.last_result = Some(round_dp(now - last_result_time, 1));
                entry.lat = Some(round_dp(lat, 3));
                entry.lon = Some(round_dp(lon, 3));
                entry.alt = Some((alt * MTOF).round() as i64);
                entry.heading = Some(ac.kalman.heading.round());
                entry.speed = Some(ac.kalman.ground_speed.round());
            }

            if ac.interesting() {
                if !ac.sync_interest.is_empty() {
                    sync_count += 1;
                }
                if !ac.mlat_interest.is_empty() {
                    mlat_count += 1;
                }
            }

            aircraft.insert(icao_to_string(ac.icao), entry);
        }

        let mut sync = HashMap::with_capacity(self.receivers.len());
        let mut locations = HashMap::with_capacity(self.receivers.len());

        for receiver in self.receivers.values_mut() {
            let peers = receiver_states
                .get(&receiver.user)
                .cloned()
                .unwrap_or_default();
            receiver.peer_count = peers.len();

            // retain a twentieth of a degree, then apply the fixed blur
            let (lat, lon) = if receiver.privacy {
                (None, None)
            } else {
                let precision = 20.0;
                let (rlat, rlon, _) = receiver.position_llh;
                (
                    Some(round_dp((rlat * precision).round() / precision + receiver.off_x, 2)),
                    Some(round_dp((rlon * precision).round() / precision + receiver.off_y, 2)),
                )
            };

            sync.insert(
                receiver.user.clone(),
                SyncEntry {
                    peers,
                    bad_syncs: receiver.bad_syncs,
                    lat,
                    lon,
                },
            );
            locations.insert(
                receiver.user.clone(),
                LocationEntry {
                    user: receiver.user.clone(),
                    lat: receiver.position_llh.0,
                    lon: receiver.position_llh.1,
                    alt: receiver.position_llh.2,
                    privacy: receiver.privacy,
                    connection: receiver.connection_info.clone(),
                },
            );
        }

        StateSnapshot {
            aircraft,
            sync,
            locations,
            mlat_count,
            sync_count,
            receiver_count: self.receivers.len(),
            aircraft_count: self.tracker.aircraft.len(),
            partition: self.tracker.partition(),
        }
    }

    /// Adjust each receiver's quarantine score from its peer-pair
    /// statistics, and decay the jump counters.
    fn score_clock_quality(&mut self, receiver_states: &ReceiverSyncState) {
        for receiver in self.receivers.values_mut() {
            let mut bad_peers = 0u32;
            // start with 10 extra peers so low-peer receivers aren't
            // quarantined by the percentage threshold alone
            let mut num_peers = 10u32;

            if let Some(peers) = receiver_states.get(&receiver.user) {
                for state in peers.values() {
                    // don't count peers that are themselves quarantined
                    if state.bad_syncs > 0.0 {
                        continue;
                    }
                    num_peers += 1;
                    if (state.sync_count > 5 && state.offset_us > 1.5) || state.offset_us > 4.0 {
                        bad_peers += 1;
                    }
                }
            }

            // Bad sync with 5 receivers or more than 10 percent of peers
            // makes this receiver the likely culprit.
            let ratio = f64::from(bad_peers) / f64::from(num_peers);
            if bad_peers > 5 || ratio > 0.1 {
                receiver.bad_syncs += (2.0 * ratio).min(1.0);
            } else {
                receiver.bad_syncs -= 0.1;
            }
            receiver.bad_syncs = receiver.bad_syncs.clamp(0.0, 6.0);

            receiver.recent_clock_jumps = (receiver.recent_clock_jumps - 0.5).max(0.0);
            receiver.recent_pair_jumps = 0;
        }
    }

    // -----------------------------------------------------------------
    // Reload handling
    // -----------------------------------------------------------------

    /// Register a callback for the reload signal. Returns a token for
    /// deregistration.
    pub fn add_reload_handler(&mut self, handler: Box<dyn Fn() + Send + Sync>) -> usize {
        self.reload_handler_seq += 1;
        let token = self.reload_handler_seq;
        self.reload_handlers.push((token, handler));
        token
    }

    pub fn remove_reload_handler(&mut self, token: usize) {
        self.reload_handlers.retain(|(t, _)| *t != token);
    }

    /// Invoke every registered reload callback.
    pub fn dispatch_reload(&self) {
        for (_, handler) in &self.reload_handlers {
            handler();
        }
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    pub fn receiver(&self, uid: ReceiverId) -> Option<&Receiver> {
        self.receivers.get(&uid)
    }

    /// Mutable access for the external engines, which maintain fields
    /// like `sync_count` and `sync_peers` on the records.
    pub fn receiver_mut(&mut self, uid: ReceiverId) -> Option<&mut Receiver> {
        self.receivers.get_mut(&uid)
    }

    pub fn receiver_by_user(&self, user: &str) -> Option<&Receiver> {
        self.usernames.get(user).and_then(|uid| self.receivers.get(uid))
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    pub fn receivers(&self) -> impl Iterator<Item = &Receiver> {
        self.receivers.values()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::PeerStats;
    use crate::testutil::{RecordingClockTracker, RecordingConnection, RecordingMlatTracker};

    fn make_coordinator() -> (Coordinator, RecordingClockTracker, RecordingMlatTracker) {
        let clock_tracker = RecordingClockTracker::default();
        let mlat_tracker = RecordingMlatTracker::default();
        let coordinator = Coordinator::new(
            (1, 1),
            SelectorConfig {
                max_sync_ac: 100,
                max_sync_rate: 50.0,
                force_mlat_interval: 600.0,
                no_adsb_mlat_seconds: 120.0,
            },
            Box::new(clock_tracker.clone()),
            Box::new(mlat_tracker.clone()),
            None,
        );
        (coordinator, clock_tracker, mlat_tracker)
    }

    fn connect(
        coordinator: &mut Coordinator,
        user: &str,
        position: (f64, f64, f64),
    ) -> (ReceiverId, Arc<RecordingConnection>) {
        let connection = RecordingConnection::new();
        let uid = coordinator
            .new_receiver(
                connection.clone(),
                None,
                user,
                "",
                position,
                "dump1090",
                false,
                "tcp test",
            )
            .unwrap();
        (uid, connection)
    }

    fn icaos(list: &[Icao]) -> HashSet<Icao> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_duplicate_user_rejected() {
        let (mut coordinator, _, _) = make_coordinator();
        connect(&mut coordinator, "station1", (48.0, 11.0, 500.0));
        let connection = RecordingConnection::new();
        let err = coordinator
            .new_receiver(
                connection,
                None,
                "station1",
                "",
                (49.0, 12.0, 400.0),
                "dump1090",
                false,
                "tcp test",
            )
            .unwrap_err();
        assert!(matches!(err, MlatError::DuplicateUser(_)));
        assert_eq!(coordinator.receiver_count(), 1);
    }

    #[test]
    fn test_authenticator_rejection_retains_no_state() {
        let clock_tracker = RecordingClockTracker::default();
        let mut coordinator = Coordinator::new(
            (1, 1),
            SelectorConfig::default(),
            Box::new(clock_tracker),
            Box::new(RecordingMlatTracker::default()),
            Some(Box::new(|_receiver: &Receiver, auth: &str| {
                if auth == "letmein" {
                    Ok(())
                } else {
                    Err("bad credentials".to_string())
                }
            })),
        );

        let err = coordinator
            .new_receiver(
                RecordingConnection::new(),
                None,
                "station1",
                "wrong",
                (48.0, 11.0, 500.0),
                "dump1090",
                false,
                "tcp test",
            )
            .unwrap_err();
        assert!(matches!(err, MlatError::AuthRejected(_)));
        assert_eq!(coordinator.receiver_count(), 0);
        assert!(coordinator.receiver_by_user("station1").is_none());

        // correct credentials go through, and the uid is fresh
        let uid = coordinator
            .new_receiver(
                RecordingConnection::new(),
                None,
                "station1",
                "letmein",
                (48.0, 11.0, 500.0),
                "dump1090",
                false,
                "tcp test",
            )
            .unwrap();
        assert!(coordinator.receiver(uid).is_some());
    }

    #[test]
    fn test_distance_matrix_symmetric_zero_diagonal() {
        let (mut coordinator, _, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));
        let (b, _) = connect(&mut coordinator, "b", (48.5, 11.5, 400.0));
        let (c, _) = connect(&mut coordinator, "c", (49.0, 12.0, 300.0));

        for &uid in &[a, b, c] {
            let receiver = coordinator.receiver(uid).unwrap();
            assert_eq!(receiver.distance[&uid], 0.0);
            assert_eq!(receiver.distance.len(), 3);
        }
        let dab = coordinator.receiver(a).unwrap().distance[&b];
        let dba = coordinator.receiver(b).unwrap().distance[&a];
        assert_eq!(dab, dba);
        assert!(dab > 10_000.0);
    }

    #[test]
    fn test_location_update_recomputes_distances() {
        let (mut coordinator, _, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));
        let (b, _) = connect(&mut coordinator, "b", (48.5, 11.5, 400.0));

        let before = coordinator.receiver(a).unwrap().distance[&b];
        coordinator.receiver_location_update(a, (50.0, 13.0, 500.0));
        let after = coordinator.receiver(a).unwrap().distance[&b];
        assert!(after > before);
        assert_eq!(coordinator.receiver(b).unwrap().distance[&a], after);
        assert_eq!(coordinator.receiver(a).unwrap().distance[&a], 0.0);
    }

    #[test]
    fn test_disconnect_purges_graph_and_distances() {
        let (mut coordinator, clock_tracker, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));
        let (b, _) = connect(&mut coordinator, "b", (48.5, 11.5, 400.0));

        // A tracks {0xA1, 0xB2}, B also tracks 0xA1
        coordinator.receiver_tracking_add(a, &icaos(&[0xA1, 0xB2]), 100.0);
        coordinator.receiver_tracking_add(b, &icaos(&[0xA1]), 100.0);

        coordinator.receiver_disconnect(a);

        // shared aircraft survives, exclusive one is gone
        assert!(coordinator.tracker.aircraft.contains_key(&0xA1));
        assert!(!coordinator.tracker.aircraft.contains_key(&0xB2));
        assert!(!coordinator.tracker.aircraft[&0xA1].tracking.contains(&a));
        // indices and distance rows released
        assert!(coordinator.receiver(a).is_none());
        assert!(coordinator.receiver_by_user("a").is_none());
        assert!(!coordinator.receiver(b).unwrap().distance.contains_key(&a));
        assert_eq!(clock_tracker.disconnects.lock().unwrap().as_slice(), &[a]);
    }

    #[test]
    fn test_username_reusable_after_disconnect() {
        let (mut coordinator, _, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "station1", (48.0, 11.0, 500.0));
        coordinator.receiver_disconnect(a);
        let (b, _) = connect(&mut coordinator, "station1", (48.0, 11.0, 500.0));
        assert_ne!(a, b);
    }

    #[test]
    fn test_uid_wrap_probes_past_live_ids() {
        let (mut coordinator, _, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "keeper", (48.0, 11.0, 500.0));
        assert_eq!(a, 0);

        coordinator.uid_counter = UID_WRAP + 1;
        let (b, _) = connect(&mut coordinator, "wrapped", (48.0, 11.0, 500.0));
        // wrapped to zero, probed past the live uid 0
        assert_eq!(b, 1);
    }

    #[test]
    fn test_drain_traffic_requests_coalesces() {
        let (mut coordinator, _, _) = make_coordinator();
        let (a, connection) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));

        coordinator.receiver_tracking_add(a, &icaos(&[0xA1]), 100.0);
        coordinator.receiver_tracking_add(a, &icaos(&[0xA2]), 100.3);
        assert!(connection.traffic.lock().unwrap().is_empty());

        coordinator.drain_traffic_requests();
        let calls = connection.traffic.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, icaos(&[0xA1, 0xA2]));
        drop(calls);

        // nothing pending: drain is a no-op
        coordinator.drain_traffic_requests();
        assert_eq!(connection.traffic.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_forward_results_requires_kalman_or_dof() {
        let (mut coordinator, _, _) = make_coordinator();
        let (a, connection) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));

        let unconverged = KalmanState::default();
        coordinator.forward_results(1.0, 0xA1, [0.0; 3], None, &[a], 3, 0, &unconverged);
        assert!(connection.reports.lock().unwrap().is_empty());

        // dof >= 1 goes through even without the filter
        coordinator.forward_results(1.0, 0xA1, [0.0; 3], None, &[a], 4, 1, &unconverged);
        assert_eq!(connection.reports.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_forward_results_isolates_failures() {
        let (mut coordinator, _, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));

        let failing = RecordingConnection::failing();
        let b = coordinator
            .new_receiver(
                failing,
                None,
                "b",
                "",
                (48.5, 11.5, 400.0),
                "dump1090",
                false,
                "tcp test",
            )
            .unwrap();
        let (c, good) = connect(&mut coordinator, "c", (49.0, 12.0, 300.0));

        let kalman = KalmanState {
            valid: true,
            ..KalmanState::default()
        };
        coordinator.forward_results(1.0, 0xA1, [0.0; 3], None, &[a, b, c], 3, 0, &kalman);

        // the failing receiver in the middle doesn't stop the others
        assert_eq!(good.reports.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_scorer_quarantines_on_bad_peers() {
        let (mut coordinator, clock_tracker, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));

        // 12 peers, 6 with offsets beyond the thresholds
        let mut peers = HashMap::new();
        for i in 0..12 {
            let bad = i < 6;
            peers.insert(
                format!("peer{i}"),
                PeerStats {
                    sync_count: 10,
                    offset_us: if bad { 2.0 } else { 0.3 },
                    drift_ppm: 0.0,
                    bad_syncs: 0.0,
                    jumped: 0,
                },
            );
        }
        clock_tracker
            .state
            .lock()
            .unwrap()
            .insert("a".to_string(), peers);

        coordinator.build_snapshot(1000.0);
        // num_peers = 10 prior + 12 counted, so the penalty is 12/22
        let expected = (2.0 * 6.0 / 22.0_f64).min(1.0);
        let bad_syncs = coordinator.receiver(a).unwrap().bad_syncs;
        assert!((bad_syncs - expected).abs() < 1e-9, "got {bad_syncs}");

        // good passes decay the score back to zero
        clock_tracker.state.lock().unwrap().clear();
        for _ in 0..10 {
            coordinator.build_snapshot(1000.0);
        }
        assert_eq!(coordinator.receiver(a).unwrap().bad_syncs, 0.0);
    }

    #[test]
    fn test_scorer_skips_quarantined_peers() {
        let (mut coordinator, clock_tracker, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));

        // every bad-looking peer is itself quarantined: nothing counts
        let mut peers = HashMap::new();
        for i in 0..8 {
            peers.insert(
                format!("peer{i}"),
                PeerStats {
                    sync_count: 10,
                    offset_us: 5.0,
                    drift_ppm: 0.0,
                    bad_syncs: 1.0,
                    jumped: 0,
                },
            );
        }
        clock_tracker
            .state
            .lock()
            .unwrap()
            .insert("a".to_string(), peers);

        coordinator.build_snapshot(1000.0);
        assert_eq!(coordinator.receiver(a).unwrap().bad_syncs, 0.0);
    }

    #[test]
    fn test_scorer_decays_jump_counters() {
        let (mut coordinator, _, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));
        {
            let receiver = coordinator.receiver_mut(a).unwrap();
            receiver.recent_clock_jumps = 1.2;
            receiver.recent_pair_jumps = 7;
        }

        coordinator.build_snapshot(1000.0);
        let receiver = coordinator.receiver(a).unwrap();
        assert!((receiver.recent_clock_jumps - 0.7).abs() < 1e-12);
        assert_eq!(receiver.recent_pair_jumps, 0);

        coordinator.build_snapshot(1015.0);
        coordinator.build_snapshot(1030.0);
        assert_eq!(coordinator.receiver(a).unwrap().recent_clock_jumps, 0.0);
    }

    #[test]
    fn test_increment_jumps_triggers_clock_reset() {
        let (mut coordinator, clock_tracker, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));
        coordinator.receiver_mut(a).unwrap().sync_peers = 2;

        // 1/2 > 0.2 immediately
        coordinator.increment_jumps(a);
        assert_eq!(clock_tracker.resets.lock().unwrap().as_slice(), &[a]);
        assert_eq!(coordinator.receiver(a).unwrap().clock_reset_counter, 1);
    }

    #[test]
    fn test_snapshot_documents() {
        let (mut coordinator, _, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "open", (48.352, 11.786, 453.0));
        let private = coordinator
            .new_receiver(
                RecordingConnection::new(),
                None,
                "hidden",
                "",
                (49.0, 12.0, 300.0),
                "radarcape_gps",
                true,
                "tcp private",
            )
            .unwrap();

        coordinator.receiver_tracking_add(a, &icaos(&[0xABCDEF]), 100.0);
        coordinator.receiver_tracking_add(private, &icaos(&[0xABCDEF]), 100.0);
        {
            let ac = coordinator.tracker.aircraft.get_mut(&0xABCDEF).unwrap();
            ac.kalman = KalmanState {
                valid: true,
                position_llh: (48.123456, 11.654321, 10000.0),
                heading: 271.6,
                ground_speed: 440.2,
            };
            ac.last_result_time = Some(995.0);
            ac.mlat_result_count = 17;
        }

        let snapshot = coordinator.build_snapshot(1000.0);

        let entry = &snapshot.aircraft["ABCDEF"];
        assert_eq!(entry.tracking, 2);
        assert_eq!(entry.allow_mlat, 1);
        assert_eq!(entry.mlat_result_count, 17);
        assert_eq!(entry.last_result, Some(5.0));
        assert_eq!(entry.lat, Some(48.123));
        assert_eq!(entry.lon, Some(11.654));
        assert_eq!(entry.alt, Some(32808)); // 10 km in feet
        assert_eq!(entry.heading, Some(272.0));
        assert_eq!(entry.speed, Some(440.0));

        // privacy nulls the coarse position, locations keeps it exact
        assert!(snapshot.sync["hidden"].lat.is_none());
        let open = &snapshot.sync["open"];
        let lat = open.lat.unwrap();
        assert!((lat - 48.35).abs() <= 0.06, "blurred lat {lat}");
        assert_eq!(snapshot.locations["hidden"].lat, 49.0);
        assert!(snapshot.locations["hidden"].privacy);
        assert_eq!(snapshot.receiver_count, 2);
        assert_eq!(snapshot.aircraft_count, 1);
    }

    #[test]
    fn test_snapshot_counts_interesting_aircraft() {
        let (mut coordinator, _, _) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));
        let (b, _) = connect(&mut coordinator, "b", (48.5, 11.5, 400.0));

        // second add runs the selector after the aircraft has two
        // trackers and 120 s without ADS-B
        coordinator.receiver_tracking_add(a, &icaos(&[0xA1]), 500.0);
        coordinator.receiver_tracking_add(b, &icaos(&[0xA1]), 1000.0);

        let snapshot = coordinator.build_snapshot(1000.0);
        assert_eq!(snapshot.sync_count, 1);
        // no ADS-B for 120 s: the aircraft is also MLAT-wanted
        assert_eq!(snapshot.mlat_count, 1);
        assert_eq!(
            snapshot.process_title("mlat"),
            "mlat (2 clients) (1 mlat 1 sync 1 tracked)"
        );
    }

    #[test]
    fn test_mlat_messages_delegate_to_solver() {
        let (mut coordinator, _, mlat_tracker) = make_coordinator();
        let (a, _) = connect(&mut coordinator, "a", (48.0, 11.0, 500.0));
        coordinator.receiver_mlat(a, 12345.0, &[0x8D, 0x48, 0x40], 1000.0);
        let messages = mlat_tracker.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, a);
    }

    #[test]
    fn test_reload_handlers() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (mut coordinator, _, _) = make_coordinator();
        let fired = Arc::new(AtomicUsize::new(0));

        let fired2 = fired.clone();
        let token = coordinator.add_reload_handler(Box::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));
        coordinator.dispatch_reload();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        coordinator.remove_reload_handler(token);
        coordinator.dispatch_reload();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
