//! Re-frame a Beast byte stream into Mode S replies.
//!
//! Wire layout of one frame:
//!
//! ```text
//! 0x1A <type:1> <ticks:6 BE> <signal:1> <payload:N>
//! ```
//!
//! Responsibilities:
//! - Find the sync marker, drop whatever precedes it
//! - Dispatch on the type byte to a fixed frame length
//! - Hold partial frames until the rest of the bytes arrive
//! - Convert the 12 MHz tick counter to an absolute timestamp
//!
//! Marker bytes inside a payload are not escaped on this feed, so a payload
//! byte equal to 0x1A followed by a plausible type byte can desynchronize
//! framing until the next real marker.

use crate::types::{FrameKind, ProtocolFrame};

/// Sync marker that opens every frame.
pub const SYNC: u8 = 0x1A;

/// Marker + type + 6 tick bytes + signal byte.
const HEADER_LEN: usize = 9;

/// Receiver clock rate in ticks per millisecond.
const TICKS_PER_MS: f64 = 12_000.0;

// ---------------------------------------------------------------------------
// Frame types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameType {
    /// Mode A/C reply. Framed to stay in sync, never emitted.
    ModeAc,
    ModeS(FrameKind),
}

impl FrameType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x31 => Some(FrameType::ModeAc),
            0x32 => Some(FrameType::ModeS(FrameKind::Short)),
            0x33 => Some(FrameType::ModeS(FrameKind::Long)),
            _ => None,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            FrameType::ModeAc => 2,
            FrameType::ModeS(kind) => kind.payload_len(),
        }
    }

    /// Total bytes on the wire: 11, 16 or 23.
    fn total_len(&self) -> usize {
        HEADER_LEN + self.payload_len()
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Counters kept by the reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub frames: u64,
    pub mode_ac_skipped: u64,
    pub resync_bytes: u64,
}

/// Incremental Beast frame reader.
///
/// Feed it whatever the transport delivers; it emits each complete frame
/// exactly once and keeps the unfinished tail for the next call.
#[derive(Debug)]
pub struct FrameReader {
    buffer: Vec<u8>,
    pos: usize,
    epoch: f64,
    stats: ReaderStats,
}

impl FrameReader {
    /// `epoch` is the absolute time (unix seconds) that tick 0 maps to.
    pub fn new(epoch: f64) -> Self {
        FrameReader {
            buffer: Vec::with_capacity(4096),
            pos: 0,
            epoch,
            stats: ReaderStats::default(),
        }
    }

    /// Append bytes and iterate over the frames that are now complete.
    ///
    /// The iterator is lazy: frames are cut as it is advanced. Dropping it
    /// early leaves the remaining bytes buffered for the next call.
    pub fn ingest(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.extend(bytes);
        Frames { reader: self }
    }

    /// Append bytes without cutting frames; pull them with `next_frame`.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Cut the next complete frame out of the buffer, if there is one.
    pub fn next_frame(&mut self) -> Option<ProtocolFrame> {
        loop {
            let pending = &self.buffer[self.pos..];

            let Some(skip) = pending.iter().position(|&b| b == SYNC) else {
                // Keep the last byte only; nothing before it can start a frame
                let keep = pending.len().min(1);
                self.stats.resync_bytes += (pending.len() - keep) as u64;
                self.pos = self.buffer.len() - keep;
                self.compact();
                return None;
            };
            self.stats.resync_bytes += skip as u64;
            self.pos += skip;

            let pending = &self.buffer[self.pos..];
            if pending.len() < 2 {
                self.compact();
                return None;
            }

            let Some(frame_type) = FrameType::from_byte(pending[1]) else {
                // False marker: step over it and rescan
                self.stats.resync_bytes += 1;
                self.pos += 1;
                continue;
            };

            let total = frame_type.total_len();
            if pending.len() < total {
                self.compact();
                return None;
            }

            let frame = match frame_type {
                FrameType::ModeAc => None,
                FrameType::ModeS(kind) => Some(self.build_frame(kind, &pending[..total])),
            };
            self.pos += total;

            match frame {
                Some(frame) => {
                    self.stats.frames += 1;
                    return Some(frame);
                }
                None => self.stats.mode_ac_skipped += 1,
            }
        }
    }

    fn build_frame(&self, kind: FrameKind, raw: &[u8]) -> ProtocolFrame {
        let timestamp_ticks = raw[2..8]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64);
        let offset_ms = timestamp_ticks as f64 / TICKS_PER_MS;

        ProtocolFrame {
            kind,
            timestamp_ticks,
            timestamp: self.epoch + offset_ms / 1000.0,
            signal_level: raw[8],
            payload: raw[HEADER_LEN..].to_vec(),
        }
    }

    /// Drop consumed bytes from the front of the buffer.
    fn compact(&mut self) {
        if self.pos > 0 {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.pos
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Forget any partial frame, e.g. after the transport reconnects.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pos = 0;
    }
}

/// Frames made complete by one `ingest` call.
pub struct Frames<'a> {
    reader: &'a mut FrameReader,
}

impl Iterator for Frames<'_> {
    type Item = ProtocolFrame;

    fn next(&mut self) -> Option<ProtocolFrame> {
        self.reader.next_frame()
    }
}

// ---------------------------------------------------------------------------
// Encoding (test fixtures and replay tooling)
// ---------------------------------------------------------------------------

/// Wrap a Mode S payload in a Beast frame.
///
/// Returns `None` for payloads that are neither 7 nor 14 bytes.
pub fn encode_frame(payload: &[u8], ticks: u64, signal_level: u8) -> Option<Vec<u8>> {
    let type_byte = match payload.len() {
        7 => 0x32,
        14 => 0x33,
        _ => return None,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(SYNC);
    out.push(type_byte);
    out.extend_from_slice(&ticks.to_be_bytes()[2..8]);
    out.push(signal_level);
    out.extend_from_slice(payload);
    Some(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hex_decode;

    const LONG_HEX: &str = "8D4840D6202CC371C32CE0576098";
    const SHORT_HEX: &str = "5D4840D6A1B2C3";

    fn long_frame(ticks: u64) -> Vec<u8> {
        encode_frame(&hex_decode(LONG_HEX).unwrap(), ticks, 0x80).unwrap()
    }

    #[test]
    fn test_single_long_frame() {
        let mut reader = FrameReader::new(1000.0);
        let frames: Vec<_> = reader.ingest(&long_frame(0)).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::Long);
        assert_eq!(frames[0].payload, hex_decode(LONG_HEX).unwrap());
        assert_eq!(frames[0].signal_level, 0x80);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_short_frame_length() {
        let bytes = encode_frame(&hex_decode(SHORT_HEX).unwrap(), 5, 10).unwrap();
        assert_eq!(bytes.len(), 16);
        let mut reader = FrameReader::new(0.0);
        let frames: Vec<_> = reader.ingest(&bytes).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::Short);
        assert_eq!(frames[0].payload.len(), 7);
    }

    #[test]
    fn test_timestamp_conversion() {
        // 12_000_000 ticks = 1000 ms = 1 s
        let mut reader = FrameReader::new(1_700_000_000.0);
        let frame = reader.ingest(&long_frame(12_000_000)).next().unwrap();
        assert_eq!(frame.timestamp_ticks, 12_000_000);
        assert!((frame.timestamp - 1_700_000_001.0).abs() < 1e-6);
    }

    #[test]
    fn test_split_across_reads() {
        let bytes = long_frame(42);
        let mut reader = FrameReader::new(0.0);

        for split in 1..bytes.len() {
            let mut reader_split = FrameReader::new(0.0);
            assert_eq!(reader_split.ingest(&bytes[..split]).count(), 0);
            let frames: Vec<_> = reader_split.ingest(&bytes[split..]).collect();
            assert_eq!(frames.len(), 1, "split at {split}");
        }

        // Byte at a time
        let mut total = 0;
        for b in &bytes {
            total += reader.ingest(std::slice::from_ref(b)).count();
        }
        assert_eq!(total, 1);
    }

    #[test]
    fn test_garbage_before_marker_discarded() {
        let mut bytes = vec![0x00, 0x11, 0x22, 0x33];
        bytes.extend(long_frame(1));
        let mut reader = FrameReader::new(0.0);
        assert_eq!(reader.ingest(&bytes).count(), 1);
        assert_eq!(reader.stats().resync_bytes, 4);
    }

    #[test]
    fn test_no_marker_keeps_last_byte() {
        let mut reader = FrameReader::new(0.0);
        assert_eq!(reader.ingest(&[0x01, 0x02, 0x03, 0x04]).count(), 0);
        assert_eq!(reader.buffered(), 1);
    }

    #[test]
    fn test_false_marker_rescans() {
        // 0x1A followed by an unknown type byte, then a real frame
        let mut bytes = vec![SYNC, 0x99];
        bytes.extend(long_frame(7));
        let mut reader = FrameReader::new(0.0);
        let frames: Vec<_> = reader.ingest(&bytes).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp_ticks, 7);
    }

    #[test]
    fn test_mode_ac_skipped_but_framed() {
        let mut bytes = vec![SYNC, 0x31, 0, 0, 0, 0, 0, 1, 0x40, 0x12, 0x34];
        bytes.extend(long_frame(2));
        let mut reader = FrameReader::new(0.0);
        let frames: Vec<_> = reader.ingest(&bytes).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(reader.stats().mode_ac_skipped, 1);
    }

    #[test]
    fn test_multiple_frames_one_read() {
        let mut bytes = long_frame(1);
        bytes.extend(long_frame(2));
        bytes.extend(encode_frame(&hex_decode(SHORT_HEX).unwrap(), 3, 0).unwrap());
        let mut reader = FrameReader::new(0.0);
        let ticks: Vec<u64> = reader.ingest(&bytes).map(|f| f.timestamp_ticks).collect();
        assert_eq!(ticks, vec![1, 2, 3]);
        assert_eq!(reader.stats().frames, 3);
    }

    #[test]
    fn test_partial_frame_waits() {
        let bytes = long_frame(1);
        let mut reader = FrameReader::new(0.0);
        assert_eq!(reader.ingest(&bytes[..20]).count(), 0);
        assert_eq!(reader.buffered(), 20);
        reader.reset();
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_lazy_iterator_leaves_rest_buffered() {
        let mut bytes = long_frame(1);
        bytes.extend(long_frame(2));
        let mut reader = FrameReader::new(0.0);
        let first = reader.ingest(&bytes).next().unwrap();
        assert_eq!(first.timestamp_ticks, 1);
        let second = reader.next_frame().unwrap();
        assert_eq!(second.timestamp_ticks, 2);
    }

    #[test]
    fn test_encode_frame_rejects_bad_length() {
        assert!(encode_frame(&[0u8; 5], 0, 0).is_none());
    }
}
