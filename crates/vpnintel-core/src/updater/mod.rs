//! Refresh pipeline
//!
//! The Updater keeps the classifier in line with the upstream feed:
//! - Fetches the feed with a deadline, retrying with exponential backoff
//! - Skips the import when the payload hash is unchanged
//! - Replaces the cache through the service otherwise
//! - Persists its status to the store (best effort)
//!
//! ## State machine
//!
//! ```text
//!            ┌──────────── unchanged ───────────┐
//!            ▼                                  │
//! ┌──────┐  fetch  ┌──────────┐  changed  ┌───────────┐
//! │ Idle │ ──────▶ │ Fetching │ ────────▶ │ Importing │
//! └──────┘         └──────────┘           └───────────┘
//!     ▲                  │ error                │
//!     └──────────────────┴──────────────────────┘
//! ```
//!
//! `Disabled` short-circuits the periodic loop. A refresh requested while
//! another one is in flight fails immediately with
//! [`Error::UpdateInProgress`].

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{UpdaterConfig, validate_source_url};
use crate::error::{Error, Result};
use crate::import::FORMAT_VERSION_KEY;
use crate::service::VpnService;
use crate::traits::{FeedFetcher, FetchRequest, VpnStore};
use crate::types::{ImportResult, UpdatePhase, UpdateStatus};

/// Events emitted by the Updater
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdaterEvent {
    /// Periodic loop started
    Started { interval: Duration },

    /// A refresh began
    UpdateStarted { url: String },

    /// The payload matched the last imported hash
    Unchanged { hash: String },

    /// A changed payload was imported
    Imported { hash: String, result: ImportResult },

    /// A refresh failed
    UpdateFailed { error: String },

    /// Periodic loop stopped
    Stopped { reason: String },
}

/// Outcome of a successful refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Same payload as last time, nothing re-imported
    Unchanged,
    /// New payload imported
    Imported(ImportResult),
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Background refresher for the VPN cache
///
/// ## Lifecycle
///
/// 1. Create with [`Updater::new()`]
/// 2. Optionally restore status with [`Updater::load_status()`]
/// 3. Start the periodic loop with [`Updater::start()`], or drive refreshes
///    manually with [`Updater::update_now()`]
/// 4. Stop with [`Updater::stop()`]
pub struct Updater {
    config: RwLock<UpdaterConfig>,
    status: RwLock<UpdateStatus>,
    service: Arc<VpnService>,
    store: Option<Arc<dyn VpnStore>>,
    fetcher: Arc<dyn FeedFetcher>,
    running: Mutex<Option<LoopHandle>>,
    event_tx: mpsc::Sender<UpdaterEvent>,
}

/// Releases the in-flight flag on every exit path
struct UpdateGuard<'a> {
    updater: &'a Updater,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        let enabled = self.updater.config.read().enabled;
        let mut status = self.updater.status.write();
        status.is_updating = false;
        status.phase = idle_phase(enabled);
    }
}

/// Fixed-rate ticker; a refresh that overruns delays the schedule instead of
/// triggering a burst of catch-up ticks
fn ticker_at(start: Instant, period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn idle_phase(enabled: bool) -> UpdatePhase {
    if enabled {
        UpdatePhase::Idle
    } else {
        UpdatePhase::Disabled
    }
}

impl Updater {
    /// Create a new Updater
    ///
    /// # Parameters
    ///
    /// - `service`: Service whose cache is refreshed; its store (if any)
    ///   receives the refresh status
    /// - `fetcher`: Feed fetcher implementation
    /// - `config`: Updater configuration
    ///
    /// # Returns
    ///
    /// A tuple of (updater, event_receiver) where event_receiver yields updater events
    pub fn new(
        service: Arc<VpnService>,
        fetcher: Arc<dyn FeedFetcher>,
        config: UpdaterConfig,
    ) -> Result<(Self, mpsc::Receiver<UpdaterEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let status = UpdateStatus {
            source_url: config.source_url.clone(),
            phase: idle_phase(config.enabled),
            ..Default::default()
        };

        let updater = Self {
            store: service.store().cloned(),
            service,
            fetcher,
            status: RwLock::new(status),
            config: RwLock::new(config),
            running: Mutex::new(None),
            event_tx: tx,
        };

        Ok((updater, rx))
    }

    /// Start the periodic loop
    ///
    /// Runs one refresh immediately, then one per update interval, until
    /// `cancel` fires or [`Updater::stop()`] is called.
    ///
    /// # Returns
    ///
    /// `false` when the updater is disabled or already running
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> bool {
        if !self.is_enabled() {
            info!("VPN updater is disabled, not starting");
            return false;
        }

        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|h| !h.task.is_finished()) {
            warn!("VPN updater already running");
            return false;
        }

        let token = cancel.child_token();
        let this = Arc::clone(self);
        let loop_token = token.clone();
        let task = tokio::spawn(async move { this.run_loop(loop_token).await });

        *running = Some(LoopHandle {
            cancel: token,
            task,
        });
        true
    }

    /// Stop the periodic loop and wait for it to exit
    pub async fn stop(&self) {
        let handle = self.running.lock().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                error!("VPN updater task failed: {}", e);
            }
        }
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let mut period = self.config.read().update_interval();
        info!("VPN updater started (interval={:?})", period);
        self.emit_event(UpdaterEvent::Started { interval: period });

        // First tick completes immediately
        let mut ticker = ticker_at(Instant::now(), period);

        loop {
            let tick = tokio::select! {
                _ = cancel.cancelled() => break,
                tick = ticker.tick() => tick,
            };

            let configured = self.config.read().update_interval();
            if configured != period {
                period = configured;
                ticker = ticker_at(tick + period, period);
            }
            self.record_next_scheduled(tick + period);

            if self.is_enabled() {
                match self.update_now(&cancel).await {
                    Ok(_) => {}
                    Err(Error::Cancelled) => break,
                    Err(Error::UpdateInProgress) => {
                        debug!("Scheduled refresh skipped, another one is in flight");
                    }
                    Err(e) => error!("VPN data update failed: {}", e),
                }
            }
        }

        info!("VPN updater stopped");
        self.emit_event(UpdaterEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
    }

    fn record_next_scheduled(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.status.write().next_scheduled =
            chrono::Duration::from_std(remaining).ok().map(|d| Utc::now() + d);
    }

    /// Refresh from the configured source URL
    pub async fn update_now(&self, cancel: &CancellationToken) -> Result<UpdateOutcome> {
        let url = self.config.read().source_url.clone();
        self.update_from_url(&url, cancel).await
    }

    /// Refresh from an explicit URL
    ///
    /// # Returns
    ///
    /// - `Ok(UpdateOutcome::Unchanged)`: Payload hash matched, cache untouched
    /// - `Ok(UpdateOutcome::Imported(..))`: Cache replaced
    /// - `Err(Error::UpdateInProgress)`: Another refresh is running
    /// - `Err(Error::Cancelled)`: `cancel` fired during fetch or backoff
    /// - `Err(..)`: All fetch attempts failed, or the payload was malformed
    pub async fn update_from_url(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome> {
        validate_source_url(url)?;
        let _guard = self.begin_update(url)?;

        self.emit_event(UpdaterEvent::UpdateStarted {
            url: url.to_string(),
        });

        let outcome = self.run_update(url, cancel).await;
        if let Err(e) = &outcome {
            self.status.write().last_error = e.to_string();
            self.emit_event(UpdaterEvent::UpdateFailed {
                error: e.to_string(),
            });
        }

        self.persist_status().await;
        outcome
    }

    fn begin_update(&self, url: &str) -> Result<UpdateGuard<'_>> {
        let mut status = self.status.write();
        if status.is_updating {
            return Err(Error::UpdateInProgress);
        }

        status.is_updating = true;
        status.phase = UpdatePhase::Fetching;
        status.last_update_attempt = Some(Utc::now());

        Ok(UpdateGuard { updater: self })
    }

    async fn run_update(&self, url: &str, cancel: &CancellationToken) -> Result<UpdateOutcome> {
        let data = self.fetch_with_retry(url, cancel).await?;
        let hash = content_hash(&data);

        let unchanged = self.status.read().data_hash == hash;
        if unchanged {
            info!("VPN data unchanged (hash {}), skipping import", short_hash(&hash));
            {
                let mut status = self.status.write();
                status.source_url = url.to_string();
                status.last_successful_update = Some(Utc::now());
                status.last_error.clear();
            }
            self.emit_event(UpdaterEvent::Unchanged { hash });
            return Ok(UpdateOutcome::Unchanged);
        }

        self.status.write().phase = UpdatePhase::Importing;
        let versions = extract_provider_versions(&data);
        let result = self.service.import_from_bytes(data).await?;

        {
            let mut status = self.status.write();
            status.source_url = url.to_string();
            status.data_hash = hash.clone();
            if let Some(versions) = versions {
                status.provider_versions = versions;
            }
            status.last_import = Some(result.clone());
            status.last_successful_update = Some(Utc::now());
            status.last_error.clear();
        }

        info!(
            hash = short_hash(&hash),
            ips = result.ips_imported,
            "VPN data updated"
        );
        self.emit_event(UpdaterEvent::Imported {
            hash,
            result: result.clone(),
        });

        Ok(UpdateOutcome::Imported(result))
    }

    /// Fetch with deadline, retries and cancellation
    async fn fetch_with_retry(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let (attempts, mut delay, timeout) = {
            let config = self.config.read();
            (
                config.retry_attempts.max(1),
                config.retry_delay(),
                config.http_timeout(),
            )
        };
        let request = FetchRequest::new(url).with_header("Accept", "application/json");

        let mut last_error = None;
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = tokio::time::timeout(timeout, self.fetcher.fetch(&request)) => {
                    r.unwrap_or(Err(Error::Timeout(timeout)))
                }
            };

            match result {
                Ok(data) => {
                    debug!(
                        "Fetched {} bytes via {} (attempt {})",
                        data.len(),
                        self.fetcher.fetcher_name(),
                        attempt
                    );
                    return Ok(data);
                }
                Err(e) => {
                    warn!("Fetch attempt {}/{} failed for {}: {}", attempt, attempts, url, e);
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = Some(e);

                    if attempt < attempts {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(Error::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        let cause = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        Err(Error::fetch(format!(
            "all {} attempts failed: {}",
            attempts, cause
        )))
    }

    async fn persist_status(&self) {
        let Some(store) = &self.store else {
            return;
        };

        let snapshot = self.status();
        if let Err(e) = store.save_update_status(&snapshot).await {
            warn!("Failed to persist update status: {}", e);
        }
    }

    /// Restore the durable part of the status from the store
    ///
    /// Only non-empty stored values overwrite the current ones.
    pub async fn load_status(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let stored = store.load_update_status().await?;
        let mut status = self.status.write();
        if stored.last_update_attempt.is_some() {
            status.last_update_attempt = stored.last_update_attempt;
        }
        if stored.last_successful_update.is_some() {
            status.last_successful_update = stored.last_successful_update;
        }
        if !stored.last_error.is_empty() {
            status.last_error = stored.last_error;
        }
        if !stored.source_url.is_empty() {
            status.source_url = stored.source_url;
        }
        if !stored.data_hash.is_empty() {
            status.data_hash = stored.data_hash;
        }
        if !stored.provider_versions.is_empty() {
            status.provider_versions = stored.provider_versions;
        }

        debug!("Restored update status (hash {})", short_hash(&status.data_hash));
        Ok(())
    }

    /// Snapshot of the current status
    pub fn status(&self) -> UpdateStatus {
        self.status.read().clone()
    }

    /// Whether a refresh is in flight
    pub fn is_updating(&self) -> bool {
        self.status.read().is_updating
    }

    /// Switch the periodic refresh on or off
    ///
    /// Takes effect at the next loop iteration; a running loop keeps ticking
    /// but skips refreshes while disabled.
    pub fn set_enabled(&self, enabled: bool) {
        self.config.write().enabled = enabled;
        let mut status = self.status.write();
        if !status.is_updating {
            status.phase = idle_phase(enabled);
        }
    }

    /// Whether the periodic refresh is on
    pub fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    /// Change the refresh interval
    ///
    /// Takes effect after the current wait. Only whole seconds are accepted.
    pub fn set_update_interval(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::config("Update interval must be > 0"));
        }
        if interval.subsec_nanos() != 0 {
            return Err(Error::config(format!(
                "Update interval must be a whole number of seconds, got {:?}",
                interval
            )));
        }
        self.config.write().update_interval_secs = interval.as_secs();
        Ok(())
    }

    /// Current configuration
    pub fn config(&self) -> UpdaterConfig {
        self.config.read().clone()
    }

    /// Emit an updater event
    fn emit_event(&self, event: UpdaterEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!("Updater event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// SHA-256 of a payload, lowercase hex
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

/// Per-provider source versions from a raw feed
///
/// Tolerates malformed provider entries by skipping them.
///
/// # Returns
///
/// `None` when the payload is not a JSON object
pub fn extract_provider_versions(data: &[u8]) -> Option<BTreeMap<String, i64>> {
    let feed: BTreeMap<String, serde_json::Value> = serde_json::from_slice(data).ok()?;

    Some(
        feed.into_iter()
            .filter(|(name, _)| name != FORMAT_VERSION_KEY)
            .filter_map(|(name, value)| {
                let entry = value.as_object()?;
                let version = entry
                    .get("version")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0);
                Some((name, version))
            })
            .collect(),
    )
}
