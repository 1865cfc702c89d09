//! Stream pipeline: bytes → frames → decoded messages → positions → registry.
//!
//! Pure logic, no I/O. The caller owns the transport and the clock; every
//! entry point takes `now` (unix seconds) so the pipeline can be driven from
//! a socket, a replay file, or a test.

use serde::Serialize;
use tracing::debug;

use crate::config::TrackingConfig;
use crate::cpr::{CprResolver, Resolution};
use crate::decode::decode;
use crate::frame::{FrameReader, ReaderStats};
use crate::registry::{FieldUpdate, FrameInfo, PositionUpdate, Registry, SnapshotRow};
use crate::types::*;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Pipeline counters since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub frames: u64,
    /// Frames dropped for failing the CRC (or too short to check).
    pub crc_failures: u64,
    pub decoded: u64,
    pub positions_local: u64,
    pub positions_global: u64,
    pub placeholders: u64,
    /// Position messages that produced nothing and were not merged.
    pub position_failures: u64,
    pub merges: u64,
}

/// What one eviction pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evicted {
    pub aircraft: usize,
    pub cpr_tracks: usize,
}

// ---------------------------------------------------------------------------
// Snapshot document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub uptime: f64,
    pub aircraft_count: usize,
    pub message_rate: f64,
}

/// Point-in-time view of every visible aircraft.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub now: f64,
    pub messages: u64,
    pub aircraft: Vec<SnapshotRow>,
    pub performance: Performance,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Frame reader, CPR resolver and registry for one stream.
#[derive(Debug)]
pub struct Tracker {
    reader: FrameReader,
    resolver: CprResolver,
    registry: Registry,
    retention_horizon: f64,
    started_at: f64,
    last_merge: Option<f64>,
    stats: TrackerStats,
}

impl Tracker {
    /// `started_at` is both the uptime origin and the epoch that frame tick
    /// counters are added to.
    pub fn new(started_at: f64, config: &TrackingConfig) -> Self {
        Tracker {
            reader: FrameReader::new(started_at),
            resolver: CprResolver::new(config.pairing_window),
            registry: Registry::new(config.visibility_horizon),
            retention_horizon: config.retention_horizon,
            started_at,
            last_merge: None,
            stats: TrackerStats::default(),
        }
    }

    /// Feed raw stream bytes. Returns how many registry merges they produced.
    pub fn ingest(&mut self, bytes: &[u8], now: f64) -> usize {
        self.reader.extend(bytes);
        let mut merges = 0;
        while let Some(frame) = self.reader.next_frame() {
            if self.process_frame(&frame, now).is_some() {
                merges += 1;
            }
        }
        merges
    }

    /// Decode, resolve and merge one frame. Returns the address merged, if any.
    pub fn process_frame(&mut self, frame: &ProtocolFrame, now: f64) -> Option<Icao> {
        self.stats.frames += 1;

        let Some(msg) = decode(&frame.payload, frame.timestamp) else {
            self.stats.crc_failures += 1;
            debug!(raw = %hex_encode(&frame.payload), "dropped frame: CRC check failed");
            return None;
        };
        self.stats.decoded += 1;

        let mut update = FieldUpdate::from_message(&msg).with_frame(FrameInfo::from_frame(frame));

        if let Some(cpr) = msg.cpr {
            match self.resolver.resolve(msg.icao, cpr, msg.nic, now) {
                Resolution::Resolved(pos) => {
                    match pos.method {
                        PositionMethod::Local => self.stats.positions_local += 1,
                        PositionMethod::Global => self.stats.positions_global += 1,
                    }
                    update = update.with_position(PositionUpdate::Resolved(pos));
                }
                Resolution::Placeholder => {
                    self.stats.placeholders += 1;
                    update = update.with_position(PositionUpdate::Placeholder);
                }
                Resolution::Unresolved => {
                    self.stats.position_failures += 1;
                    self.registry.record_failure(&msg.icao);
                    return None;
                }
            }
        }

        self.registry.merge(msg.icao, &update, now);
        self.stats.merges += 1;
        self.last_merge = Some(now);
        Some(msg.icao)
    }

    /// Drop aircraft past the visibility horizon and CPR state past the
    /// retention horizon.
    pub fn evict(&mut self, now: f64) -> Evicted {
        let evicted = Evicted {
            aircraft: self.registry.evict(now, self.registry.visibility_horizon()),
            cpr_tracks: self.resolver.evict(now, self.retention_horizon),
        };
        if evicted.aircraft > 0 || evicted.cpr_tracks > 0 {
            debug!(
                aircraft = evicted.aircraft,
                cpr_tracks = evicted.cpr_tracks,
                "evicted stale state"
            );
        }
        evicted
    }

    pub fn snapshot(&self, now: f64) -> Snapshot {
        let aircraft = self.registry.snapshot(now);
        let uptime = (now - self.started_at).max(0.0);
        let message_rate = if uptime > 0.0 {
            self.stats.decoded as f64 / uptime
        } else {
            0.0
        };
        Snapshot {
            now,
            messages: self.stats.decoded,
            performance: Performance {
                uptime,
                aircraft_count: aircraft.len(),
                message_rate,
            },
            aircraft,
        }
    }

    /// Forget a partially received frame, e.g. after reconnecting.
    pub fn reset_stream(&mut self) {
        self.reader.reset();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn resolver(&self) -> &CprResolver {
        &self.resolver
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    pub fn reader_stats(&self) -> ReaderStats {
        self.reader.stats()
    }

    /// Time of the most recent successful merge.
    pub fn last_merge(&self) -> Option<f64> {
        self.last_merge
    }

    pub fn started_at(&self) -> f64 {
        self.started_at
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
