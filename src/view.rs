//! Read-side snapshot of the plane database.
//!
//! Viewers never touch the live records; a snapshot copies out every
//! plane's validity-qualified fields under the database monitor and
//! classifies each one into a freshness band so a renderer can color
//! it without further bookkeeping.

use parking_lot::RwLock;

use crate::geo::{self, DistBear, Position};
use crate::plane::{Plane, PlaneDb};

/// ms within which a position counts as current.
const FRESH_POS_TIMEOUT: u64 = 5_000;
/// ms within which a plane counts as still transmitting.
const RECENT_SEEN_TIMEOUT: u64 = 15_000;

/// How recently a plane has made itself heard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Position updated within the last 5 s
    FreshPosition,
    /// Messages received within the last 15 s
    RecentlySeen,
    /// Silent, but not yet aged out of the database
    Stale,
}

/// Decoded vertical rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerticalRate {
    pub up: bool,
    /// Magnitude in ft/min
    pub magnitude: i32,
}

/// One plane as seen by a renderer. Fields that were never received
/// (or are currently invalid) are `None`.
#[derive(Debug, Clone)]
pub struct PlaneView {
    pub icao: u32,
    pub id: Option<String>,
    pub freshness: Freshness,
    /// ms since the last CRC-valid frame
    pub seen_age: u64,
    pub position: Option<Position>,
    /// Barometric altitude in feet
    pub altitude: Option<f64>,
    /// Bearing in degrees, 0..360
    pub bearing: Option<f64>,
    pub vertical_rate: Option<VerticalRate>,
    /// Distance and bearing from the observer, when both positions
    /// are known
    pub range: Option<DistBear>,
}

/// A consistent copy of the database at one instant.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub planes: Vec<PlaneView>,
}

impl Snapshot {
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }
}

/// Classify a plane against `now`.
fn classify(plane: &Plane, now: u64) -> Freshness {
    if plane.pos_valid && now.saturating_sub(plane.pos_time) < FRESH_POS_TIMEOUT {
        Freshness::FreshPosition
    } else if now.saturating_sub(plane.last_seen_time) < RECENT_SEEN_TIMEOUT {
        Freshness::RecentlySeen
    } else {
        Freshness::Stale
    }
}

fn view_of(plane: &Plane, now: u64, observer: Option<&Position>) -> PlaneView {
    let position = plane.pos_valid.then_some(plane.position);
    let range = match (observer, &position) {
        (Some(base), Some(pos)) => Some(geo::distance_bearing(base, pos)),
        _ => None,
    };
    PlaneView {
        icao: plane.icao,
        id: plane.id.clone(),
        freshness: classify(plane, now),
        seen_age: now.saturating_sub(plane.last_seen_time),
        position,
        altitude: plane.alt_valid.then_some(plane.alt),
        bearing: plane.bearing_valid.then_some(plane.bearing),
        vertical_rate: plane.vr_valid.then_some(VerticalRate {
            up: plane.vr_up,
            magnitude: plane.vr_magn,
        }),
        range,
    }
}

/// Copy every plane out of the database under its monitor.
pub fn snapshot(db: &RwLock<PlaneDb>, observer: Option<Position>, now: u64) -> Snapshot {
    let db = db.read();
    Snapshot {
        planes: db
            .iter()
            .map(|p| view_of(p, now, observer.as_ref()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane_with_position(icao: u32, seen: u64, pos_time: u64) -> Plane {
        let mut p = Plane::new(icao);
        p.last_seen_time = seen;
        p.pos_valid = true;
        p.pos_time = pos_time;
        p.position = Position::new(51.5, 0.0);
        p
    }

    #[test]
    fn freshness_bands() {
        let p = plane_with_position(1, 0, 0);
        assert_eq!(classify(&p, 4_999), Freshness::FreshPosition);
        assert_eq!(classify(&p, 5_000), Freshness::RecentlySeen);
        assert_eq!(classify(&p, 14_999), Freshness::RecentlySeen);
        assert_eq!(classify(&p, 15_000), Freshness::Stale);
    }

    #[test]
    fn position_band_requires_a_position() {
        let mut p = Plane::new(1);
        p.last_seen_time = 1_000;
        assert_eq!(classify(&p, 1_000), Freshness::RecentlySeen);
    }

    #[test]
    fn invalid_fields_are_absent() {
        let db = RwLock::new(PlaneDb::new());
        db.write().get_or_insert(0xA).last_seen_time = 0;

        let snap = snapshot(&db, None, 0);
        assert_eq!(snap.plane_count(), 1);
        let v = &snap.planes[0];
        assert!(v.position.is_none());
        assert!(v.altitude.is_none());
        assert!(v.bearing.is_none());
        assert!(v.vertical_rate.is_none());
        assert!(v.range.is_none());
    }

    #[test]
    fn valid_fields_are_copied_out() {
        let db = RwLock::new(PlaneDb::new());
        {
            let mut db = db.write();
            let p = db.get_or_insert(0xB);
            *p = plane_with_position(0xB, 2_000, 2_000);
            p.alt_valid = true;
            p.alt = 38_000.0;
            p.bearing_valid = true;
            p.bearing = 45.0;
            p.vr_valid = true;
            p.vr_up = true;
            p.vr_magn = 1024;
        }

        let snap = snapshot(&db, None, 3_000);
        let v = &snap.planes[0];
        assert_eq!(v.freshness, Freshness::FreshPosition);
        assert_eq!(v.seen_age, 1_000);
        assert_eq!(v.altitude, Some(38_000.0));
        assert_eq!(v.bearing, Some(45.0));
        assert_eq!(
            v.vertical_rate,
            Some(VerticalRate {
                up: true,
                magnitude: 1024
            })
        );
    }

    #[test]
    fn range_from_observer() {
        let db = RwLock::new(PlaneDb::new());
        {
            let mut db = db.write();
            *db.get_or_insert(0xC) = plane_with_position(0xC, 0, 0);
        }
        // Observer one degree south of the plane
        let snap = snapshot(&db, Some(Position::new(50.5, 0.0)), 0);
        let range = snap.planes[0].range.expect("range should be known");
        assert!((range.distance - 111_195.0).abs() < 200.0);
        assert!(range.bearing.abs() < 1e-6);
    }
}
