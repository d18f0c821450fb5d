//! ADS-B message dispatcher and field decoders.
//!
//! Takes 112-bit frames drained from the driver, gates them on
//! downlink format and CRC, and folds the decoded fields into the
//! plane database: flight ID, barometric altitude, airborne velocity
//! and bearing, and CPR airborne position (local and global decoding).

use std::f64::consts::PI;

use tracing::{debug, warn};

use crate::crc;
use crate::fifo::Msg;
use crate::geo::{self, Position};
use crate::plane::{CprRec, Plane, PlaneDb};

/// Maximum age in ms of a reference position for local CPR decoding,
/// and of the even/odd spread for global decoding.
const MAX_POS_DTIME: u64 = 15_000;

/// Latitude zone size in degrees for even/odd CPR.
const AIR_D_LAT: [f64; 2] = [6.0, 360.0 / 59.0];

/// CPR values are 17-bit fractions of a zone.
const CPR_SCALE: f64 = (1u32 << 17) as f64;

/// Flight ID character set per DO-260B: 6-bit codes to ASCII.
const ICAO_CHARS: &[u8; 64] =
    b" ABCDEFGHIJKLMNOPQRSTUVWXYZ                     0123456789      ";

/// Process one frame from the receiver.
///
/// Returns `true` iff the frame passed the DF/CF and CRC gates and was
/// charged against a plane record (the caller counts those). Rejected
/// frames leave the database untouched.
pub fn process_message(db: &mut PlaneDb, msg: &Msg, now: u64) -> bool {
    // Only DF 17 (any CF), DF 18 with CF 0/1 and DF 19 with CF 0 carry
    // payloads we understand.
    let df = (msg[0] >> 3) & 0x1F;
    let cf = msg[0] & 0x07;
    if !(df == 17 || (df == 18 && (cf & 6) == 0) || (df == 19 && cf == 0)) {
        return false;
    }
    if !crc::check(msg) {
        return false;
    }

    let icao = ((msg[1] as u32) << 16) | ((msg[2] as u32) << 8) | msg[3] as u32;
    let plane = db.get_or_insert(icao);
    plane.last_seen_time = now;

    // --- ME field at byte 4 ---
    let me = &msg[4..11];
    let tc = me[0] >> 3;
    match tc {
        1..=4 => {
            let id = parse_flight_id(me);
            if plane.id.as_deref() != Some(id.as_str()) {
                debug!("flight ID '{}' for ICAO {:06X}", id, icao);
                plane.id = Some(id);
            }
        }
        5..=8 => {
            // Surface position, not handled
        }
        9..=18 => {
            parse_air_position(plane, me, now);
            parse_baro_altitude(plane, me);
        }
        19 => {
            let subtype = me[0] & 0x07;
            // Only subtypes 1..4 are valid airborne velocity messages
            if (1..=4).contains(&subtype) {
                parse_air_velocity(plane, me, now);
            }
        }
        20..=22 => {
            debug!("GNSS altitude position for ICAO {:06X} not handled", icao);
        }
        _ => {}
    }

    true
}

/// Flight ID from ME bits 9..56: eight 6-bit characters.
fn parse_flight_id(me: &[u8]) -> String {
    let codes = [
        me[1] >> 2,
        ((me[1] & 0x03) << 4) | (me[2] >> 4),
        ((me[2] & 0x0F) << 2) | (me[3] >> 6),
        me[3] & 0x3F,
        me[4] >> 2,
        ((me[4] & 0x03) << 4) | (me[5] >> 4),
        ((me[5] & 0x0F) << 2) | (me[6] >> 6),
        me[6] & 0x3F,
    ];
    codes
        .iter()
        .map(|&c| ICAO_CHARS[c as usize] as char)
        .collect()
}

/// Barometric altitude from ME bits 9..20 of message types 9..18.
fn parse_baro_altitude(plane: &mut Plane, me: &[u8]) {
    if me[1] == 0 && (me[2] & 0xF0) == 0 {
        debug!("altitude code zero");
        plane.alt_valid = false;
    } else if me[1] & 0x01 == 0 {
        debug!("altitude encoding Q=0 not supported");
        plane.alt_valid = false;
    } else {
        let alt_code = (((me[1] & 0xFE) as u32) << 3) | (((me[2] & 0xF0) as u32) >> 4);
        plane.alt = alt_code as f64 * 25.0 - 1000.0;
        plane.alt_valid = true;
    }
}

/// Airborne velocity, message type 19 subtypes 1..4.
///
/// The vertical rate is common to all subtypes; the velocity vector
/// (and thus the bearing) is only decoded for subtype 1.
fn parse_air_velocity(plane: &mut Plane, me: &[u8], now: u64) {
    // Vertical rate, ME bits 38..46
    let vr_code = (((me[4] & 0x07) as u32) << 6) | (((me[5] & 0xFC) as u32) >> 2);
    plane.vr_valid = vr_code > 0;
    if plane.vr_valid {
        plane.vr_magn = (vr_code as i32 - 1) * 64; // ft/min
        plane.vr_up = me[4] & 0x08 == 0;
        plane.vr_time = now;
    }

    let subtype = me[0] & 0x07;
    if subtype == 1 {
        let is_west = me[1] & 0x04 != 0;
        let ew_code = (((me[1] & 0x03) as u32) << 8) | me[2] as u32;
        let is_south = me[3] & 0x80 != 0;
        let ns_code = (((me[3] & 0x7F) as u32) << 3) | (((me[4] & 0xE0) as u32) >> 5);
        // A zero magnitude code means "not available"; both components
        // are needed for a bearing.
        if ew_code != 0 && ns_code != 0 {
            // Knots; west and south are negative
            let ew_vel = if is_west { 1 - ew_code as i32 } else { ew_code as i32 - 1 };
            let ns_vel = if is_south { 1 - ns_code as i32 } else { ns_code as i32 - 1 };
            plane.bearing = geo::pmod(
                90.0 - (ns_vel as f64).atan2(ew_vel as f64) * 180.0 / PI,
                360.0,
            );
            plane.bearing_valid = true;
        }
    }
}

/// Airborne position, message types 9..18.
///
/// Stores the CPR pair into the frame's even/odd slot, then decodes
/// locally against a recent position or globally from an even/odd pair
/// received close together.
fn parse_air_position(plane: &mut Plane, me: &[u8], now: u64) {
    let idx = ((me[2] & 0x04) >> 2) as usize;
    let yz = (((me[2] & 0x03) as u32) << 15) | ((me[3] as u32) << 7) | ((me[4] as u32) >> 1);
    let xz = (((me[4] & 0x01) as u32) << 16) | ((me[5] as u32) << 8) | me[6] as u32;
    plane.cprs[idx] = CprRec {
        valid: true,
        time: now,
        yz,
        xz,
    };

    // A reference position that is too old cannot seed the local
    // decoder.
    plane.pos_local_valid =
        plane.pos_local_valid && now.saturating_sub(plane.pos_time) < MAX_POS_DTIME;

    if plane.pos_local_valid {
        // Local unambiguous decoding; failure drops back to global
        // mode on the next frame without touching the stored position.
        plane.pos_local_valid = calc_air_pos_local(&mut plane.position, &plane.cprs, idx);
        if plane.pos_local_valid {
            plane.pos_time = now;
        }
    } else if plane.cprs[0].valid
        && plane.cprs[1].valid
        && plane.cprs[idx].time.abs_diff(plane.cprs[idx ^ 1].time) < MAX_POS_DTIME
    {
        // Global unambiguous decoding from the even/odd pair
        plane.pos_local_valid = calc_air_pos_global(&mut plane.position, &plane.cprs, idx);
        if plane.pos_local_valid {
            plane.pos_time = now;
        }
    }

    if plane.pos_local_valid {
        plane.pos_surface = false;
        plane.pos_valid = true;
    }
}

/// Local unambiguous CPR decoding against a recent reference position.
///
/// The caller has already asserted the time validity of the reference.
/// On success the position is updated in place; on a deviation beyond
/// the sanity gate it is left untouched and `false` is returned.
fn calc_air_pos_local(position: &mut Position, cprs: &[CprRec; 2], idx: usize) -> bool {
    let d_lat = AIR_D_LAT[idx];
    let yz = cprs[idx].yz as f64;
    let xz = cprs[idx].xz as f64;

    // Latitude
    let j = (position.lat / d_lat).floor()
        + (0.5 + geo::pmod(position.lat, d_lat) / d_lat - yz / CPR_SCALE).floor();
    let rlat = geo::corr_lat(d_lat * (j + yz / CPR_SCALE));

    // Longitude
    let ni = f64::max(1.0, (geo::nl(rlat) - idx as i32) as f64);
    let d_lon = 360.0 / ni; // Width of one lon zone in degrees
    let m = (position.lon / d_lon).floor()
        + (0.5 + geo::pmod(position.lon, d_lon) / d_lon - xz / CPR_SCALE).floor();
    let rlon = geo::corr_lon(d_lon * (m + xz / CPR_SCALE));

    // Sanity check against the reference
    let ok = (position.lat - rlat).abs() < 1.0 && (position.lon - rlon).abs() < d_lon / 6.0;
    if ok {
        position.lat = rlat;
        position.lon = rlon;
    } else {
        warn!(
            "local position deviation ({:.2}/{:.2} -> {:.2}/{:.2})",
            position.lat, position.lon, rlat, rlon
        );
    }
    ok
}

/// Global unambiguous CPR decoding from an even/odd pair.
///
/// The caller has already asserted that both records are present and
/// close enough in time. `idx` selects which parity the current frame
/// carries; the result is anchored to it.
fn calc_air_pos_global(position: &mut Position, cprs: &[CprRec; 2], idx: usize) -> bool {
    let yz0 = cprs[0].yz as f64;
    let yz1 = cprs[1].yz as f64;

    // Latitude index and both candidate latitudes
    let j = ((59.0 * yz0 - 60.0 * yz1) / CPR_SCALE + 0.5).floor();
    let rlat0 = geo::corr_lat(AIR_D_LAT[0] * (geo::pmod(j, 60.0) + yz0 / CPR_SCALE));
    let rlat1 = geo::corr_lat(AIR_D_LAT[1] * (geo::pmod(j, 59.0) + yz1 / CPR_SCALE));

    // Even and odd must agree on the longitude zone
    let nl = geo::nl(rlat0);
    if nl != geo::nl(rlat1) {
        debug!("even/odd longitude zones differ");
        return false;
    }

    let ni = f64::max(1.0, (nl - idx as i32) as f64);
    let d_lon = 360.0 / ni;
    let m = ((cprs[0].xz as f64 * (nl as f64 - 1.0) - cprs[1].xz as f64 * nl as f64) / CPR_SCALE
        + 0.5)
        .floor();
    position.lon = geo::corr_lon(d_lon * (geo::pmod(m, ni) + cprs[idx].xz as f64 / CPR_SCALE));
    position.lat = if idx == 1 { rlat1 } else { rlat0 };
    true
}
