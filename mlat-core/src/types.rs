//! Shared identifiers, error enum, and external-state carriers for mlat-core.

use thiserror::Error;

/// All errors produced by mlat-core.
#[derive(Debug, Error)]
pub enum MlatError {
    #[error("user {0} is already connected")]
    DuplicateUser(String),
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
}

pub type Result<T> = std::result::Result<T, MlatError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// 24-bit Mode S address. Stored as a plain integer so it can be hashed
/// and partitioned without per-message allocation.
pub type Icao = u32;

/// Registry-assigned receiver identifier. Unique over live receivers;
/// wraps at 2^62 and probes past ids still in use.
pub type ReceiverId = u64;

/// Format an ICAO address as a 6-char uppercase hex string.
pub fn icao_to_string(icao: Icao) -> String {
    format!("{icao:06X}")
}

/// Parse a 6-char hex string into an ICAO address.
pub fn icao_from_hex(hex: &str) -> Option<Icao> {
    if hex.len() != 6 {
        return None;
    }
    let val = u32::from_str_radix(hex, 16).ok()?;
    (val <= 0xFF_FFFF).then_some(val)
}

// ---------------------------------------------------------------------------
// External-state carriers
// ---------------------------------------------------------------------------

/// Snapshot of the external Kalman filter state for one aircraft.
///
/// The filter itself lives in the position solver; the coordination core
/// only reads `valid` and the dump fields.
#[derive(Debug, Clone, Default)]
pub struct KalmanState {
    pub valid: bool,
    /// Latitude (deg), longitude (deg), altitude (m).
    pub position_llh: (f64, f64, f64),
    pub heading: f64,
    pub ground_speed: f64,
}

/// Opaque two-slot carrier shared across a single result fan-out call.
///
/// Connection implementations may stash encoded payloads here so that
/// later receivers in the same broadcast reuse the first encoding.
#[derive(Debug, Default)]
pub struct ResultScratch {
    pub slots: [Option<Vec<u8>>; 2],
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icao_roundtrip() {
        let icao = icao_from_hex("4840D6").unwrap();
        assert_eq!(icao, 0x4840D6);
        assert_eq!(icao_to_string(icao), "4840D6");
    }

    #[test]
    fn test_icao_zero_padded() {
        assert_eq!(icao_to_string(0xABC), "000ABC");
    }

    #[test]
    fn test_icao_from_hex_rejects_garbage() {
        assert!(icao_from_hex("4840D").is_none()); // too short
        assert!(icao_from_hex("4840D6A").is_none()); // too long
        assert!(icao_from_hex("ZZZZZZ").is_none()); // not hex
    }

    #[test]
    fn test_error_messages() {
        let err = MlatError::DuplicateUser("station1".into());
        assert_eq!(err.to_string(), "user station1 is already connected");
    }
}
