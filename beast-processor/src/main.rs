//! beast-processor: consume a Beast feed and write periodic aircraft snapshots.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use beast_core::config::{self, Config};
use beast_core::Tracker;

mod liveness;
mod notification;
mod snapshot;
mod source;

use liveness::{LivenessEvent, LivenessMonitor};
use notification::WebhookDispatcher;
use snapshot::SnapshotWriter;
use source::FeedSource;

const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "beast-processor", version, about = "Beast feed aircraft tracker")]
struct Cli {
    /// Config file (defaults to ~/.beast-processor/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Beast server host
    #[arg(long, env = "BEAST_HOST")]
    host: Option<String>,

    /// Beast server port
    #[arg(long, env = "BEAST_PORT")]
    port: Option<u16>,

    /// Directory for snapshot files
    #[arg(long, env = "OUTPUT_DIR")]
    output_dir: Option<String>,

    /// Webhook URL for stall/recovery alerts
    #[arg(long, env = "ALERT_WEBHOOK")]
    webhook: Option<String>,

    /// Seconds between snapshots
    #[arg(long)]
    snapshot_interval: Option<f64>,

    /// Seconds without a merge before the feed is reported stalled
    #[arg(long)]
    liveness_timeout: Option<f64>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.feed.host = host.clone();
        }
        if let Some(port) = self.port {
            config.feed.port = port;
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(url) = &self.webhook {
            config.liveness.webhook = Some(url.clone()).filter(|u| !u.is_empty());
        }
        if let Some(secs) = self.snapshot_interval {
            config.output.snapshot_interval = secs;
        }
        if let Some(secs) = self.liveness_timeout {
            config.liveness.timeout = secs;
        }
    }
}

/// Current wall-clock time in unix seconds.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Lock the shared tracker. A panic in another task must not take the
/// pipeline down with it, so a poisoned lock is recovered.
pub(crate) fn lock(tracker: &Mutex<Tracker>) -> MutexGuard<'_, Tracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = config::load_config(cli.config.as_deref()).context("loading config")?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    info!(
        "Starting beast-processor: feed {}:{}, output {}",
        config.feed.host, config.feed.port, config.output.dir
    );

    let writer = SnapshotWriter::new(&config.output.dir)?;
    let tracker = Arc::new(Mutex::new(Tracker::new(unix_now(), &config.tracking)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tasks: Vec<JoinHandle<()>> = vec![
        tokio::spawn(FeedSource::new(&config.feed).run(tracker.clone(), shutdown_rx.clone())),
        tokio::spawn(snapshot_job(
            tracker.clone(),
            writer,
            Duration::from_secs_f64(config.output.snapshot_interval),
            shutdown_rx.clone(),
        )),
        tokio::spawn(eviction_job(
            tracker.clone(),
            Duration::from_secs_f64(config.tracking.eviction_interval),
            shutdown_rx.clone(),
        )),
        tokio::spawn(liveness_job(
            tracker.clone(),
            config.liveness.timeout,
            config.liveness.webhook.as_deref().map(WebhookDispatcher::new),
            shutdown_rx.clone(),
        )),
        tokio::spawn(stats_job(tracker.clone(), shutdown_rx)),
    ];

    wait_for_signal().await;
    info!("Shutdown requested, stopping tasks");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            error!("Task failed during shutdown: {e}");
        }
    }

    let stats = lock(&tracker).stats();
    info!(
        frames = stats.frames,
        decoded = stats.decoded,
        crc_failures = stats.crc_failures,
        merges = stats.merges,
        "Stopped"
    );
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            _ => {
                warn!("Could not install signal handlers, falling back to Ctrl+C");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl+C: {e}");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Received Ctrl+C");
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Write a snapshot every `period`. A write in progress when shutdown
/// arrives runs to completion.
async fn snapshot_job(
    tracker: Arc<Mutex<Tracker>>,
    writer: SnapshotWriter,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let snapshot = lock(&tracker).snapshot(unix_now());
        let count = snapshot.aircraft.len();
        match writer.write(&snapshot, Utc::now()).await {
            Ok(path) => info!("Wrote {count} aircraft to {}", path.display()),
            Err(e) => warn!("Snapshot write failed: {e:#}"),
        }
    }
    info!("Snapshot job stopped");
}

async fn eviction_job(
    tracker: Arc<Mutex<Tracker>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let evicted = lock(&tracker).evict(unix_now());
        if evicted.aircraft > 0 {
            info!("Evicted {} stale aircraft", evicted.aircraft);
        }
    }
}

async fn liveness_job(
    tracker: Arc<Mutex<Tracker>>,
    timeout: f64,
    webhook: Option<WebhookDispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut monitor = LivenessMonitor::new(timeout);
    // Check often enough that a stall is reported close to the timeout
    let mut ticker = ticker(Duration::from_secs_f64((timeout / 4.0).clamp(1.0, 30.0)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let now = unix_now();
        let (last_merge, started_at) = {
            let tracker = lock(&tracker);
            (tracker.last_merge(), tracker.started_at())
        };

        let Some(event) = monitor.check(last_merge, started_at, now) else {
            continue;
        };
        match event {
            LivenessEvent::Stalled { silent_for } => {
                warn!("No aircraft updates for {silent_for:.0}s, feed appears stalled")
            }
            LivenessEvent::Recovered { silent_for } => {
                info!("Feed recovered after {silent_for:.0}s of silence")
            }
        }
        if let Some(webhook) = &webhook {
            webhook.notify(&event, now);
        }
    }
}

async fn stats_job(tracker: Arc<Mutex<Tracker>>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = ticker(STATS_INTERVAL);
    // First tick fires immediately
    ticker.tick().await;
    let mut last_decoded = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let (stats, aircraft) = {
            let tracker = lock(&tracker);
            (tracker.stats(), tracker.registry().len())
        };
        let rate = (stats.decoded - last_decoded) as f64 / STATS_INTERVAL.as_secs_f64();
        last_decoded = stats.decoded;
        info!(
            aircraft,
            crc_failures = stats.crc_failures,
            position_failures = stats.position_failures,
            "{rate:.1} msg/s, {aircraft} aircraft tracked"
        );
    }
}
