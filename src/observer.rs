//! Observer position shared with viewers.
//!
//! The receiver's own location comes from an external source and is
//! the origin for range/bearing display. The last known position can
//! be persisted as a pair of 32-bit floats so a restart has a usable
//! hint before the source delivers a fresh fix; values of 400 or more
//! mean "absent".

use std::fs;
use std::io;
use std::path::Path;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::geo::Position;

/// Sentinel marking a stored coordinate as absent.
const ABSENT: f32 = 400.0;

/// Observer position behind its own monitor. Readers copy the value
/// out; no reference to the guarded data escapes.
pub struct SharedObserver {
    pos: RwLock<Option<Position>>,
}

impl SharedObserver {
    pub fn new() -> Self {
        Self {
            pos: RwLock::new(None),
        }
    }

    pub fn set(&self, pos: Position) {
        *self.pos.write() = Some(pos);
    }

    pub fn get(&self) -> Option<Position> {
        *self.pos.read()
    }
}

impl Default for SharedObserver {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the persisted position hint, if one is stored and in range.
pub fn load_hint(path: &Path) -> Option<Position> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("cannot read position hint {}: {}", path.display(), e);
            return None;
        }
    };

    let mut lat = ABSENT;
    let mut lon = ABSENT;
    for line in text.lines() {
        if let Some(v) = line.strip_prefix("lat=") {
            lat = v.trim().parse().unwrap_or(ABSENT);
        } else if let Some(v) = line.strip_prefix("lon=") {
            lon = v.trim().parse().unwrap_or(ABSENT);
        }
    }

    if lat < ABSENT && lon < ABSENT {
        debug!("using stored observer position {:.4}/{:.4}", lat, lon);
        Some(Position::new(lat as f64, lon as f64))
    } else {
        None
    }
}

/// Persist the observer position for the next start.
pub fn save_hint(path: &Path, pos: &Position) -> io::Result<()> {
    fs::write(
        path,
        format!("lat={}\nlon={}\n", pos.lat as f32, pos.lon as f32),
    )
}
