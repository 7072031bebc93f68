//! Client-side change feed: polls a webhook's request snapshot and turns it
//! into a stream of newly seen records.
//!
//! [`ChangeFeed`] holds the reconciliation state (watermark, failure count,
//! liveness) and is driven synchronously; [`ChangeFeedClient::spawn`] runs it
//! on a tokio task against a [`SnapshotSource`]. Per tick only the single
//! newest unseen record is surfaced, so bursts between two polls collapse to
//! their latest member.

use crate::types::{RequestRecord, SnapshotResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive failures tolerated before the feed reports itself disconnected.
pub const DISCONNECT_AFTER_FAILURES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub poll_interval: Duration,
    pub max_backoff: Duration,
    pub fetch_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_backoff: DEFAULT_MAX_BACKOFF,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("snapshot request failed: {0}")]
    Transport(String),
    #[error("snapshot request returned HTTP {0}")]
    Status(u16),
    #[error("snapshot response could not be decoded: {0}")]
    Decode(String),
    #[error("snapshot request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, webhook_id: &str) -> Result<Vec<RequestRecord>, FeedError>;
}

// ---------------------------------------------------------------------------
// HTTP source
// ---------------------------------------------------------------------------

/// `{base}/webhook/{id}` followed by `tail`, with the id encoded as a single
/// path segment. `None` if `base` cannot carry a path.
pub fn webhook_url(base: &Url, webhook_id: &str, tail: &[&str]) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .push("webhook")
        .push(webhook_id)
        .extend(tail);
    url.set_query(None);
    url.set_fragment(None);
    Some(url)
}

/// Reads `GET {base_url}/webhook/{id}/requests`.
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpSnapshotSource {
    pub fn new(base_url: &str) -> Result<Self, FeedError> {
        let base_url = Url::parse(base_url).map_err(|e| FeedError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(FeedError::InvalidUrl(format!("{base_url} cannot carry a path")));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, webhook_id: &str) -> Result<Vec<RequestRecord>, FeedError> {
        let url = webhook_url(&self.base_url, webhook_id, &["requests"])
            .ok_or_else(|| FeedError::InvalidUrl(self.base_url.to_string()))?;
        let resp = self
            .client
            .get(url)
            .header("cache-control", "no-cache, no-store, must-revalidate")
            .header("pragma", "no-cache")
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(FeedError::Status(resp.status().as_u16()));
        }

        let snapshot: SnapshotResponse = resp
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;
        Ok(snapshot.requests)
    }
}

// ---------------------------------------------------------------------------
// Reconciliation state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedPhase {
    Idle,
    Polling,
    Success,
    Failure,
    Stopped,
}

impl FeedPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    pub phase: FeedPhase,
    pub connected: bool,
    pub consecutive_failures: u32,
    pub watermark: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChangeFeed {
    config: FeedConfig,
    phase: FeedPhase,
    watermark: DateTime<Utc>,
    consecutive_failures: u32,
    connected: bool,
}

impl ChangeFeed {
    /// Records at or before `watermark` are treated as already seen.
    pub fn new(config: FeedConfig, watermark: DateTime<Utc>) -> Self {
        Self {
            config,
            phase: FeedPhase::Idle,
            watermark,
            consecutive_failures: 0,
            connected: true,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    pub fn begin_poll(&mut self) {
        self.phase = FeedPhase::Polling;
    }

    /// Reconcile a successful snapshot. Returns the newest record past the
    /// watermark, if any, and advances the watermark to it. Among records
    /// with identical timestamps the last one in snapshot order wins.
    pub fn on_snapshot(&mut self, records: &[RequestRecord]) -> Option<RequestRecord> {
        self.phase = FeedPhase::Success;
        self.consecutive_failures = 0;
        self.connected = true;

        let newest = records
            .iter()
            .filter(|r| r.timestamp > self.watermark)
            .max_by_key(|r| r.timestamp)?;
        self.watermark = newest.timestamp;
        Some(newest.clone())
    }

    /// Record a failed poll and return the delay before the next one.
    pub fn on_failure(&mut self) -> Duration {
        self.phase = FeedPhase::Failure;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures > DISCONNECT_AFTER_FAILURES {
            self.connected = false;
        }
        self.next_delay()
    }

    /// Base interval while healthy; doubles per consecutive failure up to the
    /// configured cap.
    pub fn next_delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return self.config.poll_interval;
        }
        let exponent = (self.consecutive_failures - 1).min(10);
        self.config
            .poll_interval
            .saturating_mul(1_u32 << exponent)
            .min(self.config.max_backoff.max(self.config.poll_interval))
    }

    pub fn stop(&mut self) {
        self.phase = FeedPhase::Stopped;
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            phase: self.phase,
            connected: self.connected,
            consecutive_failures: self.consecutive_failures,
            watermark: self.watermark,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct ChangeFeedClient;

impl ChangeFeedClient {
    /// Start polling `webhook_id` on a background task. Only records newer
    /// than `watermark` are surfaced.
    pub fn spawn(
        source: Arc<dyn SnapshotSource>,
        webhook_id: impl Into<String>,
        config: FeedConfig,
        watermark: DateTime<Utc>,
    ) -> FeedHandle {
        let webhook_id = webhook_id.into();
        let feed = ChangeFeed::new(config, watermark);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(feed.status());
        let (records_tx, records_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(source, webhook_id, feed, records_tx, status_tx, stop_rx));

        FeedHandle {
            stop_tx,
            status: status_rx,
            records: records_rx,
            task: Some(task),
        }
    }
}

async fn run(
    source: Arc<dyn SnapshotSource>,
    webhook_id: String,
    mut feed: ChangeFeed,
    records_tx: mpsc::UnboundedSender<RequestRecord>,
    status_tx: watch::Sender<FeedStatus>,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!(webhook_id, "change feed started");
    let fetch_timeout = feed.config().fetch_timeout;

    loop {
        if *stop_rx.borrow() {
            break;
        }
        feed.begin_poll();
        status_tx.send_replace(feed.status());

        // Dropping the fetch future on stop cancels the in-flight request.
        let outcome = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            result = tokio::time::timeout(fetch_timeout, source.fetch(&webhook_id)) => {
                result.unwrap_or(Err(FeedError::Timeout(fetch_timeout)))
            }
        };

        let delay = match outcome {
            Ok(records) => {
                if let Some(record) = feed.on_snapshot(&records) {
                    debug!(webhook_id, timestamp = %record.timestamp, "new request surfaced");
                    if records_tx.send(record).is_err() {
                        break;
                    }
                }
                feed.next_delay()
            }
            Err(error) => {
                let was_connected = feed.status().connected;
                let delay = feed.on_failure();
                warn!(
                    webhook_id,
                    failures = feed.status().consecutive_failures,
                    retry_ms = delay.as_millis() as u64,
                    reason = %error,
                    "snapshot poll failed"
                );
                if was_connected && !feed.status().connected {
                    warn!(webhook_id, "change feed disconnected");
                }
                delay
            }
        };
        status_tx.send_replace(feed.status());

        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    feed.stop();
    status_tx.send_replace(feed.status());
    info!(webhook_id, "change feed stopped");
}

/// Owner side of a running feed. Dropping it stops the feed.
pub struct FeedHandle {
    stop_tx: watch::Sender<bool>,
    status: watch::Receiver<FeedStatus>,
    records: mpsc::UnboundedReceiver<RequestRecord>,
    task: Option<JoinHandle<()>>,
}

impl FeedHandle {
    /// Next surfaced record; `None` once the feed has stopped.
    pub async fn next_record(&mut self) -> Option<RequestRecord> {
        self.records.recv().await
    }

    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    /// Signal teardown. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Signal teardown and wait for the polling task to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(reason = %e, "change feed task ended abnormally");
            }
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
