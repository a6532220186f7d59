//! Periodic state-dump documents: aircraft.json, sync.json, locations.json.
//!
//! Pure data — the coordinator fills these in, the server serializes and
//! writes them. Field names and rounding are part of the on-disk schema.

use std::collections::HashMap;

use serde::Serialize;

use crate::hooks::PeerStats;

/// One aircraft.json entry, keyed by 6-hex-digit uppercase ICAO.
#[derive(Debug, Serialize)]
pub struct AircraftEntry {
    pub interesting: u8,
    pub allow_mlat: u8,
    pub tracking: usize,
    pub sync_interest: usize,
    pub mlat_interest: usize,
    pub adsb_seen: usize,
    pub mlat_message_count: u64,
    pub mlat_result_count: u64,
    pub mlat_kalman_count: u64,
    /// Present only while the Kalman state is valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    /// Feet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

/// One sync.json entry, keyed by user. Position is blurred; nulls under
/// privacy.
#[derive(Debug, Serialize)]
pub struct SyncEntry {
    pub peers: HashMap<String, PeerStats>,
    pub bad_syncs: f64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// One locations.json entry, keyed by user. Exact position; this file is
/// for operators, not the public.
#[derive(Debug, Serialize)]
pub struct LocationEntry {
    pub user: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub privacy: bool,
    pub connection: String,
}

/// Everything one dump pass produces.
#[derive(Debug)]
pub struct StateSnapshot {
    pub aircraft: HashMap<String, AircraftEntry>,
    pub sync: HashMap<String, SyncEntry>,
    pub locations: HashMap<String, LocationEntry>,
    /// Interesting aircraft with a non-empty mlat_interest set.
    pub mlat_count: usize,
    /// Interesting aircraft with a non-empty sync_interest set.
    pub sync_count: usize,
    pub receiver_count: usize,
    pub aircraft_count: usize,
    pub partition: (u32, u32),
}

impl StateSnapshot {
    /// Process-title string summarizing this snapshot.
    pub fn process_title(&self, tag: &str) -> String {
        let (index, count) = self.partition;
        if count > 1 {
            format!(
                "{tag} {index}/{count} ({r} clients) ({m} mlat {s} sync {t} tracked)",
                r = self.receiver_count,
                m = self.mlat_count,
                s = self.sync_count,
                t = self.aircraft_count,
            )
        } else {
            format!(
                "{tag} ({r} clients) ({m} mlat {s} sync {t} tracked)",
                r = self.receiver_count,
                m = self.mlat_count,
                s = self.sync_count,
                t = self.aircraft_count,
            )
        }
    }
}

/// Round to `dp` decimal places.
pub(crate) fn round_dp(value: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}
