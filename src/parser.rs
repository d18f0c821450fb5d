//! Framing parser for the receiver's ASCII line protocol.
//!
//! Frames arrive as `*<hex nibbles>;` with an even number of uppercase
//! nibbles: 14 for a standard squitter (acknowledged and discarded) or
//! 28 for an extended squitter. Extended squitters with DF 17/18/19
//! are assembled directly into a FIFO write slot and published; all
//! other input is tolerated and dropped. Bytes outside a frame are
//! ignored, so no resynchronization is ever needed.

use tracing::warn;

use crate::fifo::{FifoProducer, MSG_SIZE};

/// Maximum nibble count of one frame on the wire.
const MAX_NIBBLES: i32 = 2 * MSG_SIZE as i32;

/// Byte-stream parser feeding the message FIFO.
///
/// The parser owns the FIFO's producer endpoint. While assembling a
/// frame it owns the producer's current (uncommitted) write slot;
/// discarding a frame simply leaves the slot to be overwritten by the
/// next one, so non-ADS-B traffic never consumes FIFO space.
pub struct FrameParser {
    producer: FifoProducer,
    /// Nibble index into the current frame, or -1 when idle.
    nibble_idx: i32,
}

/// Convert an ASCII hex character to its nibble value. Strictly
/// `0-9`/`A-F`; lowercase is a protocol error.
fn hex_nibble(by: u8) -> Option<u8> {
    match by {
        b'0'..=b'9' => Some(by - b'0'),
        b'A'..=b'F' => Some(by - b'A' + 0xA),
        _ => None,
    }
}

impl FrameParser {
    pub fn new(producer: FifoProducer) -> Self {
        Self {
            producer,
            nibble_idx: -1,
        }
    }

    /// Return the parser to its idle state, dropping any partial frame.
    pub fn reset(&mut self) {
        self.nibble_idx = -1;
    }

    /// The FIFO producer endpoint, for open-time maintenance such as
    /// clearing out messages left over from a previous session.
    pub fn producer_mut(&mut self) -> &mut FifoProducer {
        &mut self.producer
    }

    /// Feed a block of receiver bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &by in bytes {
            self.feed_byte(by);
        }
    }

    /// Feed one receiver byte through the state machine.
    pub fn feed_byte(&mut self, by: u8) {
        match by {
            b'*' => self.on_start(),
            b';' => self.on_end(),
            _ if self.nibble_idx >= MAX_NIBBLES => {
                warn!("frame too long, dropping");
                self.nibble_idx = -1;
            }
            _ if self.nibble_idx >= 0 => self.on_nibble(by),
            // Outside a frame everything else is ignored.
            _ => {}
        }
    }

    fn on_start(&mut self) {
        if self.nibble_idx >= 0 {
            warn!("unexpected frame start, restarting");
            self.nibble_idx = 0;
        } else if self.producer.get_write_slot().is_some() {
            self.nibble_idx = 0;
        } else {
            warn!("FIFO full, dropping frame");
        }
    }

    fn on_end(&mut self) {
        match self.nibble_idx {
            28 => {
                // Extended squitter. Publish only ADS-B downlink
                // formats; anything else re-uses the slot.
                let df = match self.producer.get_write_slot() {
                    Some(slot) => slot[0] >> 3,
                    None => {
                        debug_assert!(false, "in-frame without a write slot");
                        self.nibble_idx = -1;
                        return;
                    }
                };
                if (17..=19).contains(&df) {
                    self.producer.commit_write();
                }
            }
            14 => {
                // Standard squitter, silently discarded.
            }
            -1 => {
                // Stray terminator outside a frame.
            }
            n => warn!("unexpected frame end at nibble {}", n),
        }
        self.nibble_idx = -1;
    }

    fn on_nibble(&mut self, by: u8) {
        let Some(nbl) = hex_nibble(by) else {
            warn!("bad nibble {:#04x}, dropping frame", by);
            self.nibble_idx = -1;
            return;
        };
        let Some(slot) = self.producer.get_write_slot() else {
            debug_assert!(false, "in-frame without a write slot");
            self.nibble_idx = -1;
            return;
        };
        let byte_idx = (self.nibble_idx >> 1) as usize;
        if self.nibble_idx & 1 == 0 {
            slot[byte_idx] = nbl << 4;
        } else {
            slot[byte_idx] |= nbl;
        }
        self.nibble_idx += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::{msg_fifo, FifoConsumer, Msg};

    const IDENT_ASCII: &[u8] = b"*8DABCDEF202CC371CB3D20C61874;";
    const IDENT_BYTES: Msg = [
        0x8D, 0xAB, 0xCD, 0xEF, 0x20, 0x2C, 0xC3, 0x71, 0xCB, 0x3D, 0x20, 0xC6, 0x18, 0x74,
    ];

    fn drain(c: &mut FifoConsumer) -> Vec<Msg> {
        let mut out = Vec::new();
        while let Some(slot) = c.get_read_slot() {
            out.push(*slot);
            c.release_read();
        }
        out
    }

    #[test]
    fn extended_squitter_roundtrip() {
        let (p, mut c) = msg_fifo(8);
        let mut parser = FrameParser::new(p);
        parser.feed(IDENT_ASCII);
        assert_eq!(drain(&mut c), vec![IDENT_BYTES]);
    }

    #[test]
    fn junk_between_frames_is_ignored() {
        let (p, mut c) = msg_fifo(8);
        let mut parser = FrameParser::new(p);
        parser.feed(b"\r\nnoise;;xyz");
        parser.feed(IDENT_ASCII);
        parser.feed(b"more noise");
        assert_eq!(drain(&mut c), vec![IDENT_BYTES]);
    }

    #[test]
    fn standard_squitter_is_discarded() {
        let (p, mut c) = msg_fifo(8);
        let mut parser = FrameParser::new(p);
        parser.feed(b"*02E197B00179C3;");
        assert!(drain(&mut c).is_empty());
        // The slot is still available for the next frame.
        parser.feed(IDENT_ASCII);
        assert_eq!(drain(&mut c), vec![IDENT_BYTES]);
    }

    #[test]
    fn non_adsb_downlink_format_is_discarded() {
        let (p, mut c) = msg_fifo(8);
        let mut parser = FrameParser::new(p);
        // DF 11 in the first byte (0x5D), 28 nibbles
        parser.feed(b"*5DABCDEF202CC371CB3D20C61874;");
        assert!(drain(&mut c).is_empty());
        parser.feed(IDENT_ASCII);
        assert_eq!(drain(&mut c), vec![IDENT_BYTES]);
    }

    #[test]
    fn lowercase_hex_is_a_bad_nibble() {
        let (p, mut c) = msg_fifo(8);
        let mut parser = FrameParser::new(p);
        parser.feed(b"*8dabcdef202cc371cb3d20c61874;");
        assert!(drain(&mut c).is_empty());
    }

    #[test]
    fn unexpected_end_drops_frame() {
        let (p, mut c) = msg_fifo(8);
        let mut parser = FrameParser::new(p);
        parser.feed(b"*8DAB;");
        assert!(drain(&mut c).is_empty());
        parser.feed(IDENT_ASCII);
        assert_eq!(drain(&mut c), vec![IDENT_BYTES]);
    }

    #[test]
    fn restart_inside_frame_keeps_the_new_frame() {
        let (p, mut c) = msg_fifo(8);
        let mut parser = FrameParser::new(p);
        parser.feed(b"*8DAB");
        parser.feed(IDENT_ASCII);
        assert_eq!(drain(&mut c), vec![IDENT_BYTES]);
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let (p, mut c) = msg_fifo(8);
        let mut parser = FrameParser::new(p);
        parser.feed(b"*8DABCDEF202CC371CB3D20C6187400;");
        assert!(drain(&mut c).is_empty());
    }

    #[test]
    fn full_fifo_drops_frame_until_drained() {
        let (p, mut c) = msg_fifo(1);
        let mut parser = FrameParser::new(p);
        parser.feed(IDENT_ASCII);
        // FIFO now holds its one message; the next start byte cannot
        // allocate a slot and the whole frame is dropped.
        parser.feed(IDENT_ASCII);
        assert_eq!(drain(&mut c).len(), 1);
        // With the FIFO drained the following frame goes through.
        parser.feed(IDENT_ASCII);
        assert_eq!(drain(&mut c).len(), 1);
    }
}
