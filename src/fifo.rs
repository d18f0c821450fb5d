//! Lock-free single-producer/single-consumer message FIFO.
//!
//! A bounded ring of fixed-size 14-byte slots. The producer fills the
//! slot at the write index in place and publishes it by advancing the
//! index; the consumer reads at the read index and frees by advancing.
//! One spare slot distinguishes empty from full. With exactly one
//! producer and one consumer, release/acquire ordering on the two
//! indices is all the synchronization required.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Size of one message slot in bytes (112-bit Mode S frame).
pub const MSG_SIZE: usize = 14;

/// One FIFO message.
pub type Msg = [u8; MSG_SIZE];

struct Inner {
    slots: Box<[UnsafeCell<Msg>]>,
    rd: AtomicUsize,
    wr: AtomicUsize,
}

// Slot access is partitioned by the index protocol: the producer only
// touches the slot at `wr` before publishing it, the consumer only the
// slot at `rd` before freeing it. The indices themselves are atomic.
unsafe impl Sync for Inner {}

impl Inner {
    fn next(&self, idx: usize) -> usize {
        (idx + 1) % self.slots.len()
    }
}

/// Create a FIFO holding up to `capacity` messages, split into its two
/// endpoint handles.
pub fn msg_fifo(capacity: usize) -> (FifoProducer, FifoConsumer) {
    // One slot more than requested so a full ring never catches up
    // with the read index.
    let slots: Vec<UnsafeCell<Msg>> = (0..capacity + 1)
        .map(|_| UnsafeCell::new([0u8; MSG_SIZE]))
        .collect();
    let inner = Arc::new(Inner {
        slots: slots.into_boxed_slice(),
        rd: AtomicUsize::new(0),
        wr: AtomicUsize::new(0),
    });
    (
        FifoProducer {
            inner: Arc::clone(&inner),
        },
        FifoConsumer { inner },
    )
}

/// Producer endpoint. Owned by exactly one thread.
pub struct FifoProducer {
    inner: Arc<Inner>,
}

impl FifoProducer {
    /// Slot at the write index, to be filled in place, or `None` when
    /// the FIFO is full. Repeated calls before `commit_write` return
    /// the same slot.
    pub fn get_write_slot(&mut self) -> Option<&mut Msg> {
        let wr = self.inner.wr.load(Ordering::Relaxed);
        if self.inner.next(wr) == self.inner.rd.load(Ordering::Acquire) {
            return None;
        }
        // Sole producer: `wr` cannot move under us, and the consumer
        // never touches an unpublished slot.
        Some(unsafe { &mut *self.inner.slots[wr].get() })
    }

    /// Publish the current write slot by advancing the write index.
    /// Only valid after `get_write_slot` returned a slot.
    pub fn commit_write(&mut self) {
        let wr = self.inner.wr.load(Ordering::Relaxed);
        debug_assert_ne!(
            self.inner.next(wr),
            self.inner.rd.load(Ordering::Acquire),
            "commit_write on full FIFO"
        );
        self.inner.wr.store(self.inner.next(wr), Ordering::Release);
    }

    /// Empty the FIFO by resetting both indices.
    ///
    /// Externally synchronized: the caller must guarantee the consumer
    /// thread is not running while this executes.
    pub fn clear(&mut self) {
        self.inner.rd.store(0, Ordering::Relaxed);
        self.inner.wr.store(0, Ordering::Relaxed);
    }
}

/// Consumer endpoint. Owned by exactly one thread.
pub struct FifoConsumer {
    inner: Arc<Inner>,
}

impl FifoConsumer {
    /// Slot at the read index, or `None` when the FIFO is empty.
    pub fn get_read_slot(&mut self) -> Option<&Msg> {
        let rd = self.inner.rd.load(Ordering::Relaxed);
        if rd == self.inner.wr.load(Ordering::Acquire) {
            return None;
        }
        // Published slots are never written again until freed.
        Some(unsafe { &*self.inner.slots[rd].get() })
    }

    /// Free the current read slot by advancing the read index.
    /// Only valid after `get_read_slot` returned a slot.
    pub fn release_read(&mut self) {
        let rd = self.inner.rd.load(Ordering::Relaxed);
        debug_assert_ne!(
            rd,
            self.inner.wr.load(Ordering::Acquire),
            "release_read on empty FIFO"
        );
        self.inner.rd.store(self.inner.next(rd), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn msg_of(n: u8) -> Msg {
        [n; MSG_SIZE]
    }

    #[test]
    fn empty_fifo_has_no_read_slot() {
        let (_p, mut c) = msg_fifo(4);
        assert!(c.get_read_slot().is_none());
    }

    #[test]
    fn write_then_read() {
        let (mut p, mut c) = msg_fifo(4);
        *p.get_write_slot().unwrap() = msg_of(0xAB);
        // Not yet published
        assert!(c.get_read_slot().is_none());
        p.commit_write();
        assert_eq!(*c.get_read_slot().unwrap(), msg_of(0xAB));
        c.release_read();
        assert!(c.get_read_slot().is_none());
    }

    #[test]
    fn uncommitted_slot_is_stable() {
        let (mut p, _c) = msg_fifo(4);
        let a = p.get_write_slot().unwrap() as *const Msg;
        let b = p.get_write_slot().unwrap() as *const Msg;
        assert_eq!(a, b);
    }

    #[test]
    fn full_fifo_rejects_writer() {
        let (mut p, mut c) = msg_fifo(2);
        for n in 0..2u8 {
            *p.get_write_slot().unwrap() = msg_of(n);
            p.commit_write();
        }
        assert!(p.get_write_slot().is_none());
        // Draining one makes room again
        c.release_read();
        assert!(p.get_write_slot().is_some());
    }

    #[test]
    fn order_is_preserved_across_wraparound() {
        let (mut p, mut c) = msg_fifo(3);
        for round in 0..10u8 {
            for n in 0..3u8 {
                *p.get_write_slot().unwrap() = msg_of(round * 3 + n);
                p.commit_write();
            }
            for n in 0..3u8 {
                assert_eq!(*c.get_read_slot().unwrap(), msg_of(round * 3 + n));
                c.release_read();
            }
        }
    }

    #[test]
    fn clear_resets_indices() {
        let (mut p, mut c) = msg_fifo(2);
        *p.get_write_slot().unwrap() = msg_of(1);
        p.commit_write();
        p.clear();
        assert!(c.get_read_slot().is_none());
        assert!(p.get_write_slot().is_some());
    }

    #[test]
    fn concurrent_producer_consumer_sees_committed_sequence() {
        const COUNT: usize = 10_000;
        let (mut p, mut c) = msg_fifo(8);

        let producer = thread::spawn(move || {
            for n in 0..COUNT {
                loop {
                    if let Some(slot) = p.get_write_slot() {
                        slot[0] = (n >> 8) as u8;
                        slot[1] = n as u8;
                        p.commit_write();
                        break;
                    }
                    thread::yield_now();
                }
            }
        });

        let mut seen = 0usize;
        while seen < COUNT {
            if let Some(slot) = c.get_read_slot() {
                let n = ((slot[0] as usize) << 8) | slot[1] as usize;
                assert_eq!(n, seen, "consumed out of order");
                c.release_read();
                seen += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
