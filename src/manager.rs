//! Plane database manager.
//!
//! Connects to a driver and keeps the database of visible planes
//! current: its thread drains the driver's message queue, dispatches
//! every frame through the decoder and periodically removes planes
//! that have gone silent. The thread must get enough execution time to
//! service the driver's FIFO before it overflows.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::decoder;
use crate::driver::AdsbDriver;
use crate::plane::PlaneDb;

/// ms after which an inactive plane is deleted.
pub const AGE_OUT_TIMEOUT: u64 = 60_000;
/// ms between checks for inactive planes.
const AGE_CHECK_INTERVAL: u64 = 10_000;
/// Idle sleep between FIFO drains.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Milliseconds on the monotonic clock shared by the whole engine.
pub fn now_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// Owner of the decode thread and the plane database monitor.
pub struct Manager {
    db: Arc<RwLock<PlaneDb>>,
    msg_count: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::resume(Arc::new(RwLock::new(PlaneDb::new())), 0)
    }

    /// Rebuild the manager around a previously captured database and
    /// message count, e.g. after the surrounding UI tore it down and
    /// recreated it.
    pub fn resume(db: Arc<RwLock<PlaneDb>>, msg_count: u64) -> Self {
        Self {
            db,
            msg_count: Arc::new(AtomicU64::new(msg_count)),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: None,
            thread: None,
        }
    }

    /// Connect to a driver and start processing its messages.
    ///
    /// The manager only relies on [`AdsbDriver::read_next_message`],
    /// so any message source with that contract can stand in.
    pub fn start(&mut self, driver: Arc<AdsbDriver>) -> bool {
        if self.thread.is_some() {
            warn!("manager already started");
            return false;
        }
        self.running.store(true, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        self.shutdown = Some(shutdown_tx);

        let db = Arc::clone(&self.db);
        let msg_count = Arc::clone(&self.msg_count);
        let running = Arc::clone(&self.running);
        self.thread = Some(thread::spawn(move || {
            info!("manager thread running");
            let mut last_age_out = 0u64;
            while running.load(Ordering::Relaxed) {
                {
                    let mut db = db.write();
                    // Deplete the driver's message queue
                    while let Some(msg) = driver.read_next_message() {
                        if decoder::process_message(&mut db, &msg, now_ms()) {
                            msg_count.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    // Every once in a while remove silent planes
                    let now = now_ms();
                    if now - last_age_out >= AGE_CHECK_INTERVAL {
                        let removed = db.remove_inactive(now, AGE_OUT_TIMEOUT);
                        if removed > 0 {
                            debug!("aged out {} planes", removed);
                        }
                        last_age_out = now;
                    }
                }
                // Interruptible idle sleep; no lock is held here.
                match shutdown_rx.recv_timeout(IDLE_SLEEP) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            info!("manager thread stopped");
        }));
        true
    }

    /// Stop the decode thread. Idempotent.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Relaxed);
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        if handle.join().is_err() {
            warn!("manager thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Total ADS-B messages processed so far.
    pub fn msg_count(&self) -> u64 {
        self.msg_count.load(Ordering::Relaxed)
    }

    /// Shared message counter, for display tasks.
    pub fn msg_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.msg_count)
    }

    /// Number of planes currently in the database.
    pub fn plane_count(&self) -> usize {
        self.db.read().len()
    }

    /// Handle on the database monitor, for viewers and for capturing
    /// state across a teardown.
    pub fn db(&self) -> Arc<RwLock<PlaneDb>> {
        Arc::clone(&self.db)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}
