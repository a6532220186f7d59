//! WGS84 geodesy primitives used by the inter-station distance matrix.
//!
//! Only what the registry needs: geodetic → ECEF conversion and straight-line
//! ECEF distance. Positions are (latitude °, longitude °, altitude m).

/// WGS84 semi-major axis (m).
const WGS84_A: f64 = 6_378_137.0;

/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// WGS84 first eccentricity squared.
const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

/// Meters to feet.
pub const MTOF: f64 = 3.280_839_9;

/// Convert geodetic coordinates to earth-centered earth-fixed (m).
pub fn llh2ecef(llh: (f64, f64, f64)) -> [f64; 3] {
    let (lat, lon, alt) = llh;
    let lat = lat.to_radians();
    let lon = lon.to_radians();

    let n = WGS84_A / (1.0 - WGS84_E2 * lat.sin() * lat.sin()).sqrt();
    [
        (n + alt) * lat.cos() * lon.cos(),
        (n + alt) * lat.cos() * lon.sin(),
        (n * (1.0 - WGS84_E2) + alt) * lat.sin(),
    ]
}

/// Straight-line distance between two ECEF points (m).
pub fn ecef_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}
