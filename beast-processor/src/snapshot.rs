//! Snapshot files: `aircraft_<UTC timestamp>.json` plus `latest.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use beast_core::Snapshot;

pub const LATEST_FILE: &str = "latest.json";

/// Writes pretty-printed snapshot documents into one directory.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    /// Create the output directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
        Ok(SnapshotWriter { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the timestamped file, then replace `latest.json`.
    ///
    /// `latest.json` is written to a temporary name and renamed so readers
    /// never see a partial document.
    pub async fn write(&self, snapshot: &Snapshot, at: DateTime<Utc>) -> Result<PathBuf> {
        let body = serde_json::to_vec_pretty(snapshot).context("serializing snapshot")?;

        let path = self.dir.join(snapshot_file_name(at));
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        let tmp = self.dir.join(format!(".{LATEST_FILE}.tmp"));
        let latest = self.dir.join(LATEST_FILE);
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &latest)
            .await
            .with_context(|| format!("replacing {}", latest.display()))?;

        Ok(path)
    }
}

/// `aircraft_2024-03-01T12_30_05.json`: ISO-8601 with `:` replaced so the
/// name is valid on every filesystem.
pub fn snapshot_file_name(at: DateTime<Utc>) -> String {
    format!("aircraft_{}.json", at.format("%Y-%m-%dT%H_%M_%S"))
}
