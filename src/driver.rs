//! Receiver driver: transport I/O thread, framing and message hand-off.
//!
//! The driver owns the background thread that pulls 64-byte buffers
//! from the transport, runs them through the framing parser and fills
//! the message FIFO. Higher layers drain decoded frames one at a time
//! via [`AdsbDriver::read_next_message`].
//!
//! A driver is constructed once and can be opened and closed per
//! attached transport; the FIFO and parser survive across cycles and
//! are cleared at every open.
//!
//! The transport cannot report how many bytes a buffer actually
//! carries; the protocol never transmits zero bytes, so buffers are
//! zeroed before they are handed out and the payload runs up to the
//! first zero byte.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::fifo::{msg_fifo, FifoConsumer, Msg};
use crate::parser::FrameParser;

/// Size of one transport read buffer.
pub const BULK_BUF_SIZE: usize = 64;

/// Maximum number of messages held in the FIFO.
const FIFO_MSG_NUM: usize = 128;

/// Payload length above which the consumer is falling behind.
const HIGH_WATER: usize = 32;

/// One transport buffer.
pub type Chunk = [u8; BULK_BUF_SIZE];

/// A byte source delivering zero-terminated 64-byte buffers.
///
/// `fill_buf` blocks until a buffer completes and returns `false` once
/// the transport is finished, either because the stream ended or
/// because `cancel` unblocked the wait. Unused tail bytes of a
/// delivered buffer must be zero.
pub trait Transport: Send + Sync {
    fn fill_buf(&self, buf: &mut Chunk) -> bool;
    fn cancel(&self);
}

/// Transport backed by a bounded channel of completed buffers.
///
/// The channel depth is the number of buffers in flight against the
/// byte source; a depth of two gives the double-buffered scheme the
/// receiver hardware expects.
pub struct ChannelTransport {
    data_rx: Receiver<Chunk>,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
}

impl ChannelTransport {
    /// Create a transport together with the sender that feeds it.
    pub fn pair(depth: usize) -> (Sender<Chunk>, ChannelTransport) {
        let (data_tx, data_rx) = bounded(depth);
        let (cancel_tx, cancel_rx) = bounded(1);
        (
            data_tx,
            ChannelTransport {
                data_rx,
                cancel_tx,
                cancel_rx,
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn fill_buf(&self, buf: &mut Chunk) -> bool {
        select! {
            recv(self.data_rx) -> chunk => {
                match chunk {
                    Ok(c) => {
                        *buf = c;
                        true
                    }
                    // Feeder hung up: end of stream.
                    Err(_) => false,
                }
            }
            recv(self.cancel_rx) -> _ => false,
        }
    }

    fn cancel(&self) {
        let _ = self.cancel_tx.try_send(());
    }
}

/// Spawn a thread feeding `reader` into a [`ChannelTransport`] as
/// zero-padded 64-byte chunks, two in flight.
pub fn spawn_stream_feeder(mut reader: impl Read + Send + 'static) -> ChannelTransport {
    let (tx, transport) = ChannelTransport::pair(2);
    thread::spawn(move || {
        loop {
            let mut chunk: Chunk = [0; BULK_BUF_SIZE];
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("input stream error: {}", e);
                    break;
                }
            }
        }
        info!("input stream finished");
    });
    transport
}

/// The running half of an open driver.
struct Active {
    transport: Arc<dyn Transport>,
    running: Arc<AtomicBool>,
    thread: JoinHandle<FrameParser>,
}

/// Driver for one attached receiver.
///
/// While closed, the driver holds the parser (and with it the FIFO's
/// producer endpoint); while open, both live on the I/O thread and
/// come back when it is joined.
pub struct AdsbDriver {
    consumer: Mutex<FifoConsumer>,
    parser: Mutex<Option<FrameParser>>,
    active: Mutex<Option<Active>>,
}

impl AdsbDriver {
    pub fn new() -> AdsbDriver {
        let (producer, consumer) = msg_fifo(FIFO_MSG_NUM);
        AdsbDriver {
            consumer: Mutex::new(consumer),
            parser: Mutex::new(Some(FrameParser::new(producer))),
            active: Mutex::new(None),
        }
    }

    /// Attach a transport and start the I/O thread.
    ///
    /// Returns false when the driver is already open. Messages left
    /// over from a previous session are discarded.
    pub fn open(&self, transport: Arc<dyn Transport>) -> bool {
        let mut active = self.active.lock();
        if active.is_some() {
            warn!("driver already open");
            return false;
        }
        let Some(mut parser) = self.parser.lock().take() else {
            // Closing always puts the parser back unless its thread
            // panicked.
            warn!("driver parser lost, cannot reopen");
            return false;
        };
        // Both FIFO endpoints are quiescent while the driver is
        // closed, which is the synchronization clear() requires.
        parser.reset();
        parser.producer_mut().clear();

        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let transport = Arc::clone(&transport);
            let running = Arc::clone(&running);
            thread::spawn(move || run_loop(transport, parser, running))
        };
        *active = Some(Active {
            transport,
            running,
            thread,
        });
        true
    }

    /// Whether the I/O thread is attached.
    pub fn is_open(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Pop the next decoded frame, or `None` when the FIFO has been
    /// drained or the driver is closed. The returned message is a copy;
    /// the live slot is released before returning.
    pub fn read_next_message(&self) -> Option<Msg> {
        if !self.is_open() {
            return None;
        }
        let mut consumer = self.consumer.lock();
        let msg = *consumer.get_read_slot()?;
        consumer.release_read();
        Some(msg)
    }

    /// Stop the I/O thread and release the transport. Idempotent.
    pub fn close(&self) {
        let Some(act) = self.active.lock().take() else {
            return;
        };
        act.running.store(false, Ordering::Relaxed);
        // Unblock a pending buffer wait.
        act.transport.cancel();
        match act.thread.join() {
            Ok(parser) => *self.parser.lock() = Some(parser),
            Err(_) => warn!("driver thread panicked"),
        }
        info!("driver closed");
    }
}

impl Drop for AdsbDriver {
    fn drop(&mut self) {
        self.close();
    }
}

impl Default for AdsbDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// The transport I/O loop: await a buffer, parse its payload, re-zero
/// it and go again. Hands the parser back for the next open.
fn run_loop(
    transport: Arc<dyn Transport>,
    mut parser: FrameParser,
    running: Arc<AtomicBool>,
) -> FrameParser {
    info!("driver thread running");
    let mut bufs: [Chunk; 2] = [[0; BULK_BUF_SIZE]; 2];
    let mut which = 0;

    while running.load(Ordering::Relaxed) {
        if !transport.fill_buf(&mut bufs[which]) {
            // Transport torn down or stream ended; either way we are
            // done.
            info!("transport finished, terminating driver thread");
            break;
        }
        if running.load(Ordering::Relaxed) {
            handle_rx_data(&mut bufs[which], &mut parser);
            which ^= 1;
        }
    }
    info!("driver thread stopped");
    parser
}

/// Parse a completed buffer up to its first zero byte, zeroing consumed
/// bytes so the buffer can be resubmitted.
fn handle_rx_data(buf: &mut Chunk, parser: &mut FrameParser) {
    let payload = buf.iter().position(|&b| b == 0).unwrap_or(BULK_BUF_SIZE);
    if payload > HIGH_WATER {
        // Not losing data yet, but the parser side is not keeping up.
        warn!("bulk buffer high water: {} bytes", payload);
    }
    parser.feed(&buf[..payload]);
    buf[..payload].fill(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const IDENT_ASCII: &[u8] = b"*8DABCDEF202CC371CB3D20C61874;";
    const IDENT_BYTES: Msg = [
        0x8D, 0xAB, 0xCD, 0xEF, 0x20, 0x2C, 0xC3, 0x71, 0xCB, 0x3D, 0x20, 0xC6, 0x18, 0x74,
    ];

    fn chunk_of(bytes: &[u8]) -> Chunk {
        assert!(bytes.len() <= BULK_BUF_SIZE);
        let mut chunk = [0u8; BULK_BUF_SIZE];
        chunk[..bytes.len()].copy_from_slice(bytes);
        chunk
    }

    fn open_driver() -> (Sender<Chunk>, AdsbDriver) {
        let (tx, transport) = ChannelTransport::pair(2);
        let driver = AdsbDriver::new();
        assert!(driver.open(Arc::new(transport)));
        (tx, driver)
    }

    fn wait_for_message(driver: &AdsbDriver) -> Option<Msg> {
        for _ in 0..200 {
            if let Some(msg) = driver.read_next_message() {
                return Some(msg);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn frames_flow_from_transport_to_reader() {
        let (tx, driver) = open_driver();
        tx.send(chunk_of(IDENT_ASCII)).unwrap();
        assert_eq!(wait_for_message(&driver), Some(IDENT_BYTES));
        assert!(driver.read_next_message().is_none());
        driver.close();
    }

    #[test]
    fn frame_split_across_buffers() {
        let (tx, driver) = open_driver();
        tx.send(chunk_of(&IDENT_ASCII[..10])).unwrap();
        tx.send(chunk_of(&IDENT_ASCII[10..])).unwrap();
        assert_eq!(wait_for_message(&driver), Some(IDENT_BYTES));
        driver.close();
    }

    #[test]
    fn close_unblocks_pending_wait() {
        let (_tx, driver) = open_driver();
        // No data will ever arrive; close must still return.
        driver.close();
        assert!(!driver.is_open());
        // Idempotent
        driver.close();
    }

    #[test]
    fn double_open_is_rejected() {
        let (_tx, driver) = open_driver();
        let (_tx2, second) = ChannelTransport::pair(2);
        assert!(!driver.open(Arc::new(second)));
        driver.close();
    }

    #[test]
    fn end_of_stream_terminates_thread() {
        let (tx, driver) = open_driver();
        tx.send(chunk_of(IDENT_ASCII)).unwrap();
        drop(tx);
        assert_eq!(wait_for_message(&driver), Some(IDENT_BYTES));
        driver.close();
    }

    #[test]
    fn closed_driver_reads_nothing() {
        let (tx, driver) = open_driver();
        tx.send(chunk_of(IDENT_ASCII)).unwrap();
        let _ = wait_for_message(&driver);
        driver.close();
        tx.send(chunk_of(IDENT_ASCII)).ok();
        assert!(driver.read_next_message().is_none());
    }

    #[test]
    fn reopen_clears_stale_messages() {
        let (tx, driver) = open_driver();
        // Two frames in, only one drained before the close.
        tx.send(chunk_of(IDENT_ASCII)).unwrap();
        tx.send(chunk_of(IDENT_ASCII)).unwrap();
        assert_eq!(wait_for_message(&driver), Some(IDENT_BYTES));
        driver.close();

        // The second session must not see the leftover frame.
        let (tx2, transport) = ChannelTransport::pair(2);
        assert!(driver.open(Arc::new(transport)));
        assert!(driver.read_next_message().is_none());
        tx2.send(chunk_of(IDENT_ASCII)).unwrap();
        assert_eq!(wait_for_message(&driver), Some(IDENT_BYTES));
        driver.close();
    }

    #[test]
    fn stream_feeder_delivers_reader_bytes() {
        let data: Vec<u8> = IDENT_ASCII.to_vec();
        let transport = spawn_stream_feeder(std::io::Cursor::new(data));
        let driver = AdsbDriver::new();
        assert!(driver.open(Arc::new(transport)));
        assert_eq!(wait_for_message(&driver), Some(IDENT_BYTES));
        driver.close();
    }
}
