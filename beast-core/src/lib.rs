//! beast-core: Pure decode + tracking library for Beast-framed Mode S feeds.
//!
//! No async, no I/O. The `beast-processor` binary owns the
//! socket, the clock and the output files; everything between the raw bytes
//! and the snapshot rows lives here.

pub mod config;
pub mod cpr;
pub mod crc;
pub mod decode;
pub mod frame;
pub mod registry;
pub mod tracker;
pub mod types;

// Re-export commonly used types at crate root
pub use config::Config;
pub use cpr::{CprResolver, Resolution};
pub use decode::decode;
pub use frame::FrameReader;
pub use registry::{AircraftState, Registry, SnapshotRow};
pub use tracker::{Snapshot, Tracker, TrackerStats};
pub use types::*;
