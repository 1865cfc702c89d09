//! Configuration file management for beast-processor.
//!
//! Reads/writes `~/.beast-processor/config.yaml`: feed endpoint, output
//! directory, tracking horizons, and liveness alerting. Durations are in
//! seconds.

use std::path::{Path, PathBuf};

use crate::types::{BeastError, Result};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub feed: FeedConfig,
    pub output: OutputConfig,
    pub tracking: TrackingConfig,
    pub liveness: LivenessConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    pub reconnect_delay: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub dir: String,
    pub snapshot_interval: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    /// Aircraft silent longer than this drop out of snapshots.
    pub visibility_horizon: f64,
    /// CPR pairing state silent longer than this is discarded.
    pub retention_horizon: f64,
    /// Even/odd frames older than this are not paired.
    pub pairing_window: f64,
    pub eviction_interval: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LivenessConfig {
    /// No successful merge for this long counts as a stall.
    pub timeout: f64,
    pub webhook: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed: FeedConfig {
                host: "readsb-data-collector".into(),
                port: 30105,
                reconnect_delay: 5.0,
            },
            output: OutputConfig {
                dir: "./output".into(),
                snapshot_interval: 5.0,
            },
            tracking: TrackingConfig {
                visibility_horizon: 60.0,
                retention_horizon: 300.0,
                pairing_window: 10.0,
                eviction_interval: 30.0,
            },
            liveness: LivenessConfig {
                timeout: 120.0,
                webhook: None,
            },
        }
    }
}

impl Config {
    /// Reject settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("feed.reconnect_delay", self.feed.reconnect_delay),
            ("output.snapshot_interval", self.output.snapshot_interval),
            ("tracking.visibility_horizon", self.tracking.visibility_horizon),
            ("tracking.retention_horizon", self.tracking.retention_horizon),
            ("tracking.pairing_window", self.tracking.pairing_window),
            ("tracking.eviction_interval", self.tracking.eviction_interval),
            ("liveness.timeout", self.liveness.timeout),
        ];
        for (name, value) in intervals {
            if !(value.is_finite() && value > 0.0) {
                return Err(BeastError::Config(format!("{name} must be positive, got {value}")));
            }
        }

        if self.tracking.retention_horizon < self.tracking.visibility_horizon {
            return Err(BeastError::Config(format!(
                "tracking.retention_horizon ({}) is shorter than tracking.visibility_horizon ({})",
                self.tracking.retention_horizon, self.tracking.visibility_horizon
            )));
        }
        if self.feed.host.is_empty() {
            return Err(BeastError::Config("feed.host is empty".into()));
        }
        if self.feed.port == 0 {
            return Err(BeastError::Config("feed.port must be non-zero".into()));
        }
        Ok(())
    }
}

/// Get the config directory path (`~/.beast-processor/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".beast-processor")
}

/// Get the default config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `path`, or the default location when `None`.
///
/// A missing file yields the defaults; an unreadable or malformed one is an
/// error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_file);
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(&path)?;
    parse_config(&text)
}

/// Save config to `path`, creating parent directories.
pub fn save_config(config: &Config, path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serialize_config(config))?;
    Ok(path.to_path_buf())
}

/// Parse simple YAML-like config text: `section:` headers followed by
/// indented `key: value` lines.
pub fn parse_config(text: &str) -> Result<Config> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for (lineno, line) in text.lines().enumerate() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            return Err(BeastError::Config(format!("line {}: expected `key: value`", lineno + 1)));
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }
        let Some(section) = current_section.as_deref() else {
            continue;
        };

        let at = |e: BeastError| match e {
            BeastError::Config(msg) => BeastError::Config(format!("line {}: {msg}", lineno + 1)),
            other => other,
        };

        match (section, key) {
            ("feed", "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.feed.host = v;
                }
            }
            ("feed", "port") => {
                config.feed.port = val
                    .parse()
                    .map_err(|_| at(BeastError::Config(format!("invalid port: {val}"))))?;
            }
            ("feed", "reconnect_delay") => {
                config.feed.reconnect_delay = parse_seconds(key, val).map_err(at)?
            }
            ("output", "dir") => {
                if let Some(v) = parse_string_value(val) {
                    config.output.dir = v;
                }
            }
            ("output", "snapshot_interval") => {
                config.output.snapshot_interval = parse_seconds(key, val).map_err(at)?
            }
            ("tracking", "visibility_horizon") => {
                config.tracking.visibility_horizon = parse_seconds(key, val).map_err(at)?
            }
            ("tracking", "retention_horizon") => {
                config.tracking.retention_horizon = parse_seconds(key, val).map_err(at)?
            }
            ("tracking", "pairing_window") => {
                config.tracking.pairing_window = parse_seconds(key, val).map_err(at)?
            }
            ("tracking", "eviction_interval") => {
                config.tracking.eviction_interval = parse_seconds(key, val).map_err(at)?
            }
            ("liveness", "timeout") => {
                config.liveness.timeout = parse_seconds(key, val).map_err(at)?
            }
            ("liveness", "webhook") => config.liveness.webhook = parse_string_value(val),
            _ => {}
        }
    }

    Ok(config)
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_seconds(key: &str, val: &str) -> Result<f64> {
    val.parse()
        .map_err(|_| BeastError::Config(format!("invalid value for {key}: {val}")))
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# beast-processor configuration".to_string(), String::new()];

    lines.push("feed:".into());
    lines.push(format!("  host: \"{}\"", config.feed.host));
    lines.push(format!("  port: {}", config.feed.port));
    lines.push(format!("  reconnect_delay: {}", config.feed.reconnect_delay));
    lines.push(String::new());

    lines.push("output:".into());
    lines.push(format!("  dir: \"{}\"", config.output.dir));
    lines.push(format!("  snapshot_interval: {}", config.output.snapshot_interval));
    lines.push(String::new());

    let t = &config.tracking;
    lines.push("tracking:".into());
    lines.push(format!("  visibility_horizon: {}", t.visibility_horizon));
    lines.push(format!("  retention_horizon: {}", t.retention_horizon));
    lines.push(format!("  pairing_window: {}", t.pairing_window));
    lines.push(format!("  eviction_interval: {}", t.eviction_interval));
    lines.push(String::new());

    lines.push("liveness:".into());
    lines.push(format!("  timeout: {}", config.liveness.timeout));
    match &config.liveness.webhook {
        Some(url) => lines.push(format!("  webhook: \"{url}\"")),
        None => lines.push("  webhook: null".into()),
    }

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
