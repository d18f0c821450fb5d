//! Geographic math helpers.
//!
//! Spherical distance/bearing between two positions plus the numeric
//! utilities shared by the CPR position decoder.

use std::f64::consts::PI;

/// Mean earth radius in metres.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// A geographic position without altitude.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    /// Latitude in degrees, -90..90
    pub lat: f64,
    /// Longitude in degrees, -180..180
    pub lon: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Distance and initial bearing between two positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistBear {
    /// Distance in metres
    pub distance: f64,
    /// Initial bearing in degrees, 0..360
    pub bearing: f64,
}

/// Great-circle distance (spherical law of cosines) and initial bearing
/// from `from` to `to`.
pub fn distance_bearing(from: &Position, to: &Position) -> DistBear {
    let sin_lat1 = (from.lat / 180.0 * PI).sin();
    let cos_lat1 = (from.lat / 180.0 * PI).cos();
    let sin_lat2 = (to.lat / 180.0 * PI).sin();
    let cos_lat2 = (to.lat / 180.0 * PI).cos();
    let sin_dlon = ((to.lon - from.lon) / 180.0 * PI).sin();
    let cos_dlon = ((to.lon - from.lon) / 180.0 * PI).cos();

    let cos_c = (sin_lat1 * sin_lat2 + cos_lat1 * cos_lat2 * cos_dlon).clamp(-1.0, 1.0);
    let distance = cos_c.acos() * EARTH_RADIUS;

    let mut bearing =
        (sin_dlon * cos_lat2).atan2(cos_lat1 * sin_lat2 - sin_lat1 * cos_lat2 * cos_dlon) / PI
            * 180.0;
    if bearing < 0.0 {
        bearing += 360.0;
    }

    DistBear { distance, bearing }
}

/// Modulo that always returns a non-negative result.
pub fn pmod(x: f64, m: f64) -> f64 {
    let r = x % m;
    if r < 0.0 {
        r + m
    } else {
        r
    }
}

/// Fold a 0..360 latitude into -90..90 (southern hemisphere comes in as
/// 270..360).
pub fn corr_lat(lat: f64) -> f64 {
    if lat > 180.0 {
        lat - 360.0
    } else {
        lat
    }
}

/// Fold a 0..360 longitude into -180..180.
pub fn corr_lon(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

/// NL transition latitudes from RTCA 1090-WP-9-14, ascending. Crossing
/// threshold `i` drops the zone count from `59 - i` to `58 - i`.
const NL_THRESHOLDS: [f64; 58] = [
    10.47047130,
    14.82817437,
    18.18626357,
    21.02939493,
    23.54504487,
    25.82924707,
    27.93898710,
    29.91135686,
    31.77209708,
    33.53993436,
    35.22899598,
    36.85025108,
    38.41241892,
    39.92256684,
    41.38651832,
    42.80914012,
    44.19454951,
    45.54626723,
    46.86733252,
    48.16039128,
    49.42776439,
    50.67150166,
    51.89342469,
    53.09516153,
    54.27817472,
    55.44378444,
    56.59318756,
    57.72747354,
    58.84763776,
    59.95459277,
    61.04917774,
    62.13216659,
    63.20427479,
    64.26616523,
    65.31845310,
    66.36171008,
    67.39646774,
    68.42322022,
    69.44242631,
    70.45451075,
    71.45986473,
    72.45884545,
    73.45177442,
    74.43893416,
    75.42056257,
    76.39684391,
    77.36789461,
    78.33374083,
    79.29428225,
    80.24923213,
    81.19801349,
    82.13956981,
    83.07199445,
    83.99173563,
    84.89166191,
    85.75541621,
    86.53536998,
    87.00000000,
];

/// Number of longitude zones at the given latitude (1..59). Symmetric
/// in the sign of the latitude.
pub fn nl(lat: f64) -> i32 {
    let lat = lat.abs();
    let crossed = NL_THRESHOLDS.partition_point(|&t| lat >= t);
    59 - crossed as i32
}
