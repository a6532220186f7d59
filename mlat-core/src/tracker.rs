//! Aircraft registry and the per-receiver interest selector.
//!
//! Pure logic — no I/O. Maintains the bipartite "who sees whom" graph
//! between receivers and aircraft and works out, per receiver, which
//! aircraft it should forward sync and MLAT traffic for.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::SelectorConfig;
use crate::receiver::Receiver;
use crate::types::{Icao, KalmanState, ReceiverId};

// ---------------------------------------------------------------------------
// Tracked aircraft
// ---------------------------------------------------------------------------

/// A single tracked aircraft.
///
/// All receiver references are by uid. For every relation R in
/// {tracking, sync_interest, mlat_interest, adsb_seen} the mirror holds:
/// `r.R.contains(ac.icao) iff ac.R.contains(r.uid)`.
pub struct TrackedAircraft {
    pub icao: Icao,
    /// True iff this ICAO hashes into the local partition.
    pub allow_mlat: bool,

    pub tracking: HashSet<ReceiverId>,
    pub sync_interest: HashSet<ReceiverId>,
    pub adsb_seen: HashSet<ReceiverId>,
    pub mlat_interest: HashSet<ReceiverId>,

    /// Wall-clock time of the last usable ADS-B position.
    pub last_adsb_time: f64,
    /// Start of the most recent forced-MLAT cycle.
    pub last_force_mlat: f64,
    pub force_mlat: bool,

    pub mlat_message_count: u64,
    pub mlat_result_count: u64,
    pub mlat_kalman_count: u64,

    /// Last reported altitude (ft) and its flight-profile history.
    pub altitude: Option<f64>,
    pub last_altitude_time: Option<f64>,
    pub alt_history: Vec<(f64, f64)>,
    pub vrate: Option<f64>,
    pub vrate_time: Option<f64>,

    pub last_result_time: Option<f64>,
    pub last_result_position: Option<[f64; 3]>,
    pub last_result_var: Option<f64>,
    pub last_result_distinct: Option<usize>,
    pub kalman: KalmanState,
    pub last_resolve_attempt: f64,

    pub callsign: Option<String>,
    pub squawk: Option<String>,
    /// Registry timestamp, refreshed by tracking adds and rate reports.
    pub seen: f64,

    pub sync_good: u32,
    pub sync_bad: u32,
    pub sync_dont_use: u32,
    pub sync_bad_percent: f64,

    /// Cached outcome of the last MLAT-wanted refresh.
    pub do_mlat: bool,
}

impl TrackedAircraft {
    fn new(
        icao: Icao,
        allow_mlat: bool,
        now: f64,
        force_interval: f64,
        rng: &mut impl Rng,
    ) -> Self {
        TrackedAircraft {
            icao,
            allow_mlat,
            tracking: HashSet::new(),
            sync_interest: HashSet::new(),
            adsb_seen: HashSet::new(),
            mlat_interest: HashSet::new(),
            last_adsb_time: 0.0,
            // stagger forced-MLAT cycles across the fleet
            last_force_mlat: now - force_interval * rng.gen::<f64>(),
            force_mlat: false,
            mlat_message_count: 0,
            mlat_result_count: 0,
            mlat_kalman_count: 0,
            altitude: None,
            last_altitude_time: None,
            alt_history: Vec::new(),
            vrate: None,
            vrate_time: None,
            last_result_time: None,
            last_result_position: None,
            last_result_var: None,
            last_result_distinct: None,
            kalman: KalmanState::default(),
            last_resolve_attempt: 0.0,
            callsign: None,
            squawk: None,
            seen: now,
            sync_good: 0,
            sync_bad: 0,
            sync_dont_use: 0,
            sync_bad_percent: 0.0,
            do_mlat: false,
        }
    }

    /// Is any station being asked to forward traffic for this aircraft?
    pub fn interesting(&self) -> bool {
        !self.sync_interest.is_empty() || (self.allow_mlat && !self.mlat_interest.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// One rate-product candidate: this receiver and `peer` both see `icao`.
#[derive(Debug, Clone, Copy)]
struct RatePair {
    rp: f64,
    peer: ReceiverId,
    icao: Icao,
    /// The receiver's own reported rate for this aircraft.
    rate: f64,
}

/// Tracks which receivers can see which aircraft and chooses per-receiver
/// sync/MLAT subsets.
pub struct Tracker {
    pub aircraft: HashMap<Icao, TrackedAircraft>,
    /// Zero-based partition id.
    partition_id: u32,
    partition_count: u32,
    pub config: SelectorConfig,
    mlat_wanted: HashSet<Icao>,
    mlat_wanted_ts: f64,
}

impl Tracker {
    /// `partition` is `(index, count)` with `1 <= index <= count`.
    pub fn new(partition: (u32, u32), config: SelectorConfig) -> Self {
        let (index, count) = partition;
        assert!(count >= 1 && index >= 1 && index <= count, "bad partition {partition:?}");
        Tracker {
            aircraft: HashMap::new(),
            partition_id: index - 1,
            partition_count: count,
            config,
            mlat_wanted: HashSet::new(),
            mlat_wanted_ts: 0.0,
        }
    }

    /// Deterministic shard filter over the 24-bit address space.
    pub fn in_local_partition(&self, icao: Icao) -> bool {
        if self.partition_count == 1 {
            return true;
        }
        // mix the address a bit
        let mut h = icao;
        h = ((h >> 16) ^ h).wrapping_mul(0x45d9f3b);
        h = ((h >> 16) ^ h).wrapping_mul(0x45d9f3b);
        h = (h >> 16) ^ h;
        h % self.partition_count == self.partition_id
    }

    /// Add tracking edges between a receiver and a set of aircraft,
    /// creating aircraft records as needed.
    pub fn add(
        &mut self,
        receiver: &mut Receiver,
        icao_set: &HashSet<Icao>,
        now: f64,
        rng: &mut impl Rng,
    ) {
        let force_interval = self.config.force_mlat_interval;
        for &icao in icao_set {
            let allow_mlat = self.in_local_partition(icao);
            let ac = self
                .aircraft
                .entry(icao)
                .or_insert_with(|| TrackedAircraft::new(icao, allow_mlat, now, force_interval, rng));
            ac.tracking.insert(receiver.uid);
            receiver.tracking.insert(icao);
            ac.seen = now;
        }
    }

    /// Remove tracking edges; aircraft nobody tracks any more are dropped.
    pub fn remove(&mut self, receiver: &mut Receiver, icao_set: &HashSet<Icao>) {
        for &icao in icao_set {
            let mut empty = false;
            if let Some(ac) = self.aircraft.get_mut(&icao) {
                ac.tracking.remove(&receiver.uid);
                receiver.tracking.remove(&icao);
                empty = ac.tracking.is_empty();
            }
            if empty {
                self.aircraft.remove(&icao);
            }
        }
    }

    /// Remove a receiver from every edge set of every aircraft it touches.
    pub fn remove_all(&mut self, receiver: &mut Receiver) {
        for icao in &receiver.tracking {
            let mut empty = false;
            if let Some(ac) = self.aircraft.get_mut(icao) {
                ac.tracking.remove(&receiver.uid);
                ac.sync_interest.remove(&receiver.uid);
                ac.adsb_seen.remove(&receiver.uid);
                ac.mlat_interest.remove(&receiver.uid);
                empty = ac.tracking.is_empty();
            }
            if empty {
                self.aircraft.remove(icao);
            }
        }
        receiver.tracking.clear();
        receiver.adsb_seen.clear();
        receiver.sync_interest.clear();
        receiver.mlat_interest.clear();
    }

    /// Recompute one receiver's interest sets from the latest tracking
    /// and rate-report data, then commit them. `peers` must not contain
    /// the receiver itself.
    pub fn update_interest(
        &mut self,
        receiver: &mut Receiver,
        peers: &HashMap<ReceiverId, Receiver>,
        now: f64,
        rng: &mut impl Rng,
    ) {
        if now - self.mlat_wanted_ts > 0.1 {
            self.refresh_mlat_wanted(now, rng);
        }

        let new_mlat: HashSet<Icao> = receiver
            .tracking
            .intersection(&self.mlat_wanted)
            .copied()
            .collect();

        if receiver.last_rate_report.is_none() {
            // Legacy client, no rate report, we cannot be very selective.
            let mut new_sync = receiver.tracking.clone();
            if new_sync.len() > self.config.max_sync_ac {
                new_sync = sample_up_to(new_sync.into_iter().collect(), self.config.max_sync_ac, rng)
                    .into_iter()
                    .collect();
            }
            self.commit_interest_sets(receiver, new_sync, new_mlat, HashSet::new(), rng);
            return;
        }

        let (new_sync, new_adsb) = self.rate_aware_selection(receiver, peers, now, rng);
        self.commit_interest_sets(receiver, new_sync, new_mlat, new_adsb, rng);
    }

    /// Commit new interest sets for one receiver, diffing against the
    /// current ones and updating the mirror sets on each aircraft so the
    /// bipartite symmetry invariant holds throughout.
    pub fn commit_interest_sets(
        &mut self,
        receiver: &mut Receiver,
        mut new_sync: HashSet<Icao>,
        mut new_mlat: HashSet<Icao>,
        new_adsb: HashSet<Icao>,
        rng: &mut impl Rng,
    ) {
        let quarter = self.config.max_sync_ac / 4;
        if receiver.bad_syncs > 2.0 && new_sync.len() > quarter {
            new_sync = sample_up_to(new_sync.into_iter().collect(), quarter, rng)
                .into_iter()
                .collect();
        }
        if receiver.bad_syncs > 0.0 {
            new_mlat.clear();
        }

        let uid = receiver.uid;

        for icao in new_adsb.difference(&receiver.adsb_seen) {
            if let Some(ac) = self.aircraft.get_mut(icao) {
                ac.adsb_seen.insert(uid);
            }
        }
        for icao in receiver.adsb_seen.difference(&new_adsb) {
            if let Some(ac) = self.aircraft.get_mut(icao) {
                ac.adsb_seen.remove(&uid);
            }
        }

        for icao in new_sync.difference(&receiver.sync_interest) {
            if let Some(ac) = self.aircraft.get_mut(icao) {
                ac.sync_interest.insert(uid);
            }
        }
        for icao in receiver.sync_interest.difference(&new_sync) {
            if let Some(ac) = self.aircraft.get_mut(icao) {
                ac.sync_interest.remove(&uid);
            }
        }

        for icao in new_mlat.difference(&receiver.mlat_interest) {
            if let Some(ac) = self.aircraft.get_mut(icao) {
                ac.mlat_interest.insert(uid);
            }
        }
        for icao in receiver.mlat_interest.difference(&new_mlat) {
            if let Some(ac) = self.aircraft.get_mut(icao) {
                ac.mlat_interest.remove(&uid);
            }
        }

        receiver.adsb_seen = new_adsb;
        receiver.sync_interest = new_sync;
        receiver.mlat_interest = new_mlat;
    }

    /// Recompute the global MLAT-wanted set. Throttled by the caller to
    /// at most every 0.1 s.
    fn refresh_mlat_wanted(&mut self, now: f64, rng: &mut impl Rng) {
        self.mlat_wanted.clear();
        let interval = self.config.force_mlat_interval;
        let no_adsb = self.config.no_adsb_mlat_seconds;

        for ac in self.aircraft.values_mut() {
            let since_force = now - ac.last_force_mlat;
            if !ac.force_mlat && since_force > interval - 15.0 {
                ac.force_mlat = true;
            }
            if since_force > interval + 15.0 {
                // sub-second fudge keeps cycles from re-aligning
                ac.last_force_mlat = now + rng.gen::<f64>();
                ac.force_mlat = false;
            }

            let wanted = ac.tracking.len() >= 2
                && ac.allow_mlat
                && (now - ac.last_adsb_time > no_adsb
                    || ac.sync_bad_percent > 10.0
                    || (since_force > interval - 15.0 && since_force < interval));
            ac.do_mlat = wanted;
            if wanted {
                self.mlat_wanted.insert(ac.icao);
            }
        }

        self.mlat_wanted_ts = now;
    }

    /// Rate-aware sync selection: build rate-product candidates against
    /// every peer that tracks the same aircraft, then pick two rounds'
    /// worth under the per-peer and total-rate budgets.
    fn rate_aware_selection(
        &mut self,
        receiver: &Receiver,
        peers: &HashMap<ReceiverId, Receiver>,
        now: f64,
        rng: &mut impl Rng,
    ) -> (HashSet<Icao>, HashSet<Icao>) {
        let mut new_adsb: HashSet<Icao> = HashSet::new();
        let mut pairs_by_aircraft: HashMap<Icao, Vec<RatePair>> = HashMap::new();
        let mut ratepair_list: Vec<RatePair> = Vec::new();

        let empty_report = HashMap::new();
        let report = receiver.last_rate_report.as_ref().unwrap_or(&empty_report);

        for (&icao, &rate) in report {
            let Some(ac) = self.aircraft.get_mut(&icao) else {
                // don't create aircraft from rate reports; lingering
                // entries would never be cleaned up
                continue;
            };
            ac.seen = now;
            new_adsb.insert(icao);

            // favor higher flying aircraft for geometric diversity
            let alt_factor = match ac.altitude {
                Some(alt) if alt > 0.0 => Some(1.0 + (alt / 20000.0).powf(1.5)),
                _ => None,
            };

            let candidates = pairs_by_aircraft.entry(icao).or_default();
            for &peer_uid in &ac.tracking {
                if peer_uid == receiver.uid {
                    continue;
                }
                let Some(peer) = peers.get(&peer_uid) else {
                    continue;
                };
                let peer_rate = match &peer.last_rate_report {
                    Some(peer_report) => peer_report.get(&icao).copied().unwrap_or(0.0),
                    // peer without rate reports, just take a guess
                    None => 0.8,
                };

                let mut rp = rate * peer_rate / 2.25;
                if let Some(factor) = alt_factor {
                    rp *= factor;
                }
                if rp < 0.01 {
                    continue;
                }

                let pair = RatePair {
                    rp,
                    peer: peer_uid,
                    icao,
                    rate,
                };
                candidates.push(pair);
                ratepair_list.push(pair);
            }
        }

        ratepair_list.sort_by(|a, b| b.rp.total_cmp(&a.rp));
        let mut first_half = ratepair_list[..ratepair_list.len() / 2].to_vec();
        first_half.shuffle(rng);

        let mut ntotal: HashMap<ReceiverId, f64> = HashMap::new();
        let mut new_sync: HashSet<Icao> = HashSet::new();
        let mut total_rate = 0.0;

        // Round 1: top half by rate product, tight per-peer budget. Skip
        // aircraft flagged with sub-par position sources.
        for pair in &first_half {
            if new_sync.contains(&pair.icao) {
                continue;
            }
            if self
                .aircraft
                .get(&pair.icao)
                .is_some_and(|ac| ac.sync_dont_use > 0)
            {
                continue;
            }
            if total_rate > self.config.max_sync_rate {
                break;
            }
            if ntotal.get(&pair.peer).copied().unwrap_or(0.0) < 0.3 {
                new_sync.insert(pair.icao);
                total_rate += pair.rate;
                for other in &pairs_by_aircraft[&pair.icao] {
                    *ntotal.entry(other.peer).or_insert(0.0) += other.rp;
                }
            }
        }

        // Round 2: whole list, loosened per-peer budget.
        for pair in &ratepair_list {
            if new_sync.contains(&pair.icao) {
                continue;
            }
            if total_rate > self.config.max_sync_rate {
                break;
            }
            if ntotal.get(&pair.peer).copied().unwrap_or(0.0) < 3.5 {
                new_sync.insert(pair.icao);
                total_rate += pair.rate;
                for other in &pairs_by_aircraft[&pair.icao] {
                    *ntotal.entry(other.peer).or_insert(0.0) += other.rp;
                }
            }
        }

        // Top up small sets: first from rate-report aircraft, then from
        // the full tracking set.
        let target = self.config.max_sync_ac / 4;
        if new_sync.len() < target {
            let available: Vec<Icao> = pairs_by_aircraft
                .keys()
                .filter(|icao| !new_sync.contains(icao))
                .copied()
                .collect();
            new_sync.extend(sample_up_to(available, target - new_sync.len(), rng));

            if new_sync.len() < target {
                let available: Vec<Icao> = receiver
                    .tracking
                    .iter()
                    .filter(|icao| !new_sync.contains(icao))
                    .copied()
                    .collect();
                new_sync.extend(sample_up_to(available, target - new_sync.len(), rng));
            }
        }

        (new_sync, new_adsb)
    }

    /// Aircraft currently wanted for MLAT, as of the last refresh.
    pub fn mlat_wanted(&self) -> &HashSet<Icao> {
        &self.mlat_wanted
    }

    pub fn partition(&self) -> (u32, u32) {
        (self.partition_id + 1, self.partition_count)
    }
}

/// Uniform random sample of up to `k` items.
fn sample_up_to<T: Copy>(mut items: Vec<T>, k: usize, rng: &mut impl Rng) -> Vec<T> {
    if items.len() <= k {
        return items;
    }
    let (chosen, _) = items.partial_shuffle(rng, k);
    chosen.to_vec()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
