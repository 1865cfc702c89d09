//! TCP Beast feed with a fixed-delay reconnect loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info};

use beast_core::config::FeedConfig;
use beast_core::Tracker;

use crate::{lock, unix_now};

const READ_BUFFER_SIZE: usize = 8192;

/// Outcome of one connection attempt.
enum ConnectionResult {
    /// Server closed the stream cleanly.
    Closed,
    /// Connection could not be established.
    ConnectionFailed(anyhow::Error),
    /// Connection was established but a read failed.
    OperationFailed(anyhow::Error),
    /// Shutdown was requested while connected.
    Shutdown,
}

/// Beast client feeding every received byte into the shared tracker.
pub struct FeedSource {
    host: String,
    port: u16,
    reconnect_delay: Duration,
}

impl FeedSource {
    pub fn new(config: &FeedConfig) -> Self {
        FeedSource {
            host: config.host.clone(),
            port: config.port,
            reconnect_delay: Duration::from_secs_f64(config.reconnect_delay),
        }
    }

    /// Connect, read until the stream ends, wait, reconnect. Returns only on
    /// shutdown.
    pub async fn run(self, tracker: Arc<Mutex<Tracker>>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let result = self.connect_and_run(&tracker, &mut shutdown).await;

            match result {
                ConnectionResult::Shutdown => break,
                ConnectionResult::Closed => info!("Beast connection closed, reconnecting..."),
                ConnectionResult::ConnectionFailed(e) => error!("Beast connection failed: {e:#}"),
                ConnectionResult::OperationFailed(e) => error!("Beast connection error: {e:#}"),
            }

            // A partial frame from the old connection would corrupt the next one
            lock(&tracker).reset_stream();

            info!("Retrying in {:.1}s", self.reconnect_delay.as_secs_f64());
            tokio::select! {
                _ = sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("Feed source stopped");
    }

    async fn connect_and_run(
        &self,
        tracker: &Arc<Mutex<Tracker>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionResult {
        info!("Connecting to Beast server {}:{}", self.host, self.port);

        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let mut stream = tokio::select! {
            res = connect => {
                let res = res.with_context(|| format!("connecting to {}:{}", self.host, self.port));
                match res {
                    Ok(stream) => stream,
                    Err(e) => return ConnectionResult::ConnectionFailed(e),
                }
            }
            _ = shutdown.changed() => return ConnectionResult::Shutdown,
        };
        info!("Connected to Beast stream at {}:{}", self.host, self.port);

        match self.read_loop(&mut stream, tracker, shutdown).await {
            Ok(result) => result,
            Err(e) => ConnectionResult::OperationFailed(e),
        }
    }

    async fn read_loop(
        &self,
        stream: &mut TcpStream,
        tracker: &Arc<Mutex<Tracker>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ConnectionResult> {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut received = 0u64;

        loop {
            let n = tokio::select! {
                res = stream.read(&mut buffer) => res.context("reading Beast stream")?,
                _ = shutdown.changed() => return Ok(ConnectionResult::Shutdown),
            };
            if n == 0 {
                info!("Beast stream ended after {received} bytes");
                return Ok(ConnectionResult::Closed);
            }
            received += n as u64;

            let merges = lock(tracker).ingest(&buffer[..n], unix_now());
            if merges == 0 {
                debug!("{n} bytes produced no merges");
            }
        }
    }
}

impl std::fmt::Debug for FeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSource")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}
