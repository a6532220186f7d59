//! Receiver clock models, built from the client-declared clock type.
//!
//! The synchronization engine owns the pairing math; the coordinator only
//! needs the nominal parameters of each clock family.

/// Nominal parameters of a receiver's message-timestamp clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockModel {
    /// Nominal tick rate (Hz).
    pub freq: f64,
    /// Worst-case relative frequency error.
    pub max_freq_error: f64,
    /// Expected single-measurement timestamp jitter (s).
    pub jitter: f64,
    /// True when the clock is already disciplined to an absolute
    /// timebase (GPS), so pair offsets should stay near zero.
    pub absolute: bool,
}

/// Build the clock model for a client-declared clock type.
///
/// Unknown types get the 12 MHz profile, the most common hardware.
pub fn make_clock(clock_type: &str) -> ClockModel {
    match clock_type {
        "radarcape_gps" => ClockModel {
            freq: 1e9,
            max_freq_error: 1e-6,
            jitter: 15e-9,
            absolute: true,
        },
        "sbs" => ClockModel {
            freq: 20e6,
            max_freq_error: 100e-6,
            jitter: 500e-9,
            absolute: false,
        },
        // "beast", "dump1090", and anything else: 12 MHz free-running
        _ => ClockModel {
            freq: 12e6,
            max_freq_error: 5e-6,
            jitter: 83e-9,
            absolute: false,
        },
    }
}
