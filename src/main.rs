//! adsb-rx: ADS-B receiver front-end and live aircraft database
//!
//! Reads the `*<hex>;` byte stream of a Mode S receiver, decodes the
//! ADS-B subset relevant to surveillance and keeps a database of the
//! currently visible planes, displayed as a periodically refreshed
//! table.

#![allow(dead_code)]

mod config;
mod crc;
mod decoder;
mod driver;
mod fifo;
mod geo;
mod manager;
mod observer;
mod parser;
mod plane;
mod view;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::driver::AdsbDriver;
use crate::geo::Position;
use crate::manager::Manager;
use crate::observer::SharedObserver;
use crate::plane::PlaneDb;
use crate::view::{Freshness, Snapshot};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_args();

    // Initialize logging only if not in interactive mode
    if !config.interactive {
        let level = if config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        };
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber).ok();
        info!("adsb-rx starting...");
    }

    // Observer position: command line wins, then the persisted hint
    let observer = Arc::new(SharedObserver::new());
    if let (Some(lat), Some(lon)) = (config.observer_lat, config.observer_lon) {
        observer.set(Position::new(lat, lon));
    } else if let Some(pos) = observer::load_hint(Path::new(&config.pos_file)) {
        observer.set(pos);
    }

    // Receiver byte stream
    let reader: Box<dyn Read + Send> = match config.filename.as_deref() {
        None | Some("-") => Box::new(io::stdin()),
        Some(name) => Box::new(File::open(name)?),
    };
    let transport = driver::spawn_stream_feeder(reader);
    let driver = Arc::new(AdsbDriver::new());
    driver.open(Arc::new(transport));

    let mut manager = Manager::new();
    manager.start(Arc::clone(&driver));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let db = manager.db();
        let msg_count = manager.msg_counter();
        let obs = Arc::clone(&observer);

        let display = if config.interactive {
            let rows = config.interactive_rows;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    draw_table(&db, &msg_count, &obs, rows);
                }
            })
        } else {
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    info!(
                        "planes: {}, messages: {}",
                        db.read().len(),
                        msg_count.load(Ordering::Relaxed)
                    );
                }
            })
        };

        tokio::signal::ctrl_c().await.ok();
        display.abort();
    });

    manager.stop();
    driver.close();

    if let Some(pos) = observer.get() {
        if let Err(e) = observer::save_hint(Path::new(&config.pos_file), &pos) {
            info!("could not save observer position: {}", e);
        }
    }

    Ok(())
}

/// Redraw the interactive plane table from a database snapshot.
fn draw_table(
    db: &RwLock<PlaneDb>,
    msg_count: &AtomicU64,
    observer: &SharedObserver,
    max_rows: usize,
) {
    let now = manager::now_ms();
    let snap: Snapshot = view::snapshot(db, observer.get(), now);

    // Clear screen and move cursor to top
    print!("\x1B[2J\x1B[H");
    println!(
        "\x1B[1m{:<6} {:<8} {:>9} {:>5} {:>5} {:>9} {:>10} {:>8} {:>5} {:>5}\x1B[0m",
        "Hex", "Flight", "Altitude", "VR", "Brg", "Lat", "Lon", "Range", "State", "Seen"
    );
    println!("{}", "-".repeat(80));

    let mut planes = snap.planes.clone();
    // Most recently seen first
    planes.sort_by_key(|p| p.seen_age);

    for p in planes.iter().take(max_rows) {
        let alt_str = p.altitude.map(|a| format!("{:.0}", a)).unwrap_or_default();
        let vr_str = p
            .vertical_rate
            .map(|vr| {
                if vr.magnitude <= 64 {
                    "-".to_string()
                } else if vr.up {
                    "\u{25b2}".to_string()
                } else {
                    "\u{25bc}".to_string()
                }
            })
            .unwrap_or_default();
        let brg_str = p.bearing.map(|b| format!("{:.0}", b)).unwrap_or_default();
        let (lat_str, lon_str) = p
            .position
            .map(|pos| (format!("{:.4}", pos.lat), format!("{:.4}", pos.lon)))
            .unwrap_or_default();
        let range_str = p
            .range
            .map(|r| format!("{:.0}km", r.distance / 1000.0))
            .unwrap_or_default();
        let state = match p.freshness {
            Freshness::FreshPosition => "pos",
            Freshness::RecentlySeen => "seen",
            Freshness::Stale => "old",
        };

        println!(
            "{:06X} {:<8} {:>9} {:>5} {:>5} {:>9} {:>10} {:>8} {:>5} {:>4}s",
            p.icao,
            p.id.as_deref().unwrap_or(""),
            alt_str,
            vr_str,
            brg_str,
            lat_str,
            lon_str,
            range_str,
            state,
            p.seen_age / 1000
        );
    }

    println!("{}", "-".repeat(80));
    println!(
        "Planes: {} | Messages: {} | Press Ctrl+C to exit",
        snap.plane_count(),
        msg_count.load(Ordering::Relaxed)
    );
    io::stdout().flush().ok();
}
