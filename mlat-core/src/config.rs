//! Selector tuning constants and their environment overrides.
//!
//! Values are read once at startup; the selector never consults the
//! environment on the hot path.

/// Cap on the number of aircraft a single receiver is asked to forward
/// sync traffic for.
pub const MAX_SYNC_AC: usize = 100;

/// Cap on the cumulative ADS-B message rate (msg/s) budgeted for sync
/// traffic per receiver.
pub const MAX_SYNC_RATE: f64 = 50.0;

/// Tunables consumed by the interest selector.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub max_sync_ac: usize,
    pub max_sync_rate: f64,
    /// Seconds between forced MLAT windows per aircraft.
    pub force_mlat_interval: f64,
    /// Seconds without ADS-B before an aircraft becomes MLAT-wanted.
    pub no_adsb_mlat_seconds: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            max_sync_ac: MAX_SYNC_AC,
            max_sync_rate: MAX_SYNC_RATE,
            force_mlat_interval: env_seconds("MLAT_SERVER_FORCE_MLAT_INTERVAL", 600.0),
            no_adsb_mlat_seconds: env_seconds("MLAT_SERVER_NO_ADSB_MLAT_SECONDS", 120.0),
        }
    }
}

fn env_seconds(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .map(|v| v as f64)
        .unwrap_or(default)
}
