//! Test doubles and common utilities for contract tests
//!
//! Fetchers here count their calls so tests can assert how many requests
//! the Updater made.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use vpnintel_core::error::{Error, Result};
use vpnintel_core::traits::{FeedFetcher, FetchRequest, VpnStore};
use vpnintel_core::types::{IpRecord, LookupResult, Provider, Server, Stats};
use vpnintel_core::{MemoryStore, UpdaterConfig};

/// Small two-provider feed
pub const FEED_V1: &str = r#"{
    "version": 1,
    "mullvad": {"version": 4, "timestamp": 1700000000, "servers": [
        {"vpn": "wireguard", "country": "Sweden", "city": "Stockholm", "hostname": "se-sto-wg-001",
         "ips": ["185.65.134.10", "2a03:1b20:1::10"]},
        {"vpn": "openvpn", "country": "Sweden", "city": "Malmo", "hostname": "se-mma-001",
         "ips": ["185.65.134.20"]}
    ]},
    "nordvpn": {"version": 2, "timestamp": 1700000100, "servers": [
        {"country": "Germany", "city": "Berlin", "hostname": "de100.nordvpn.com",
         "ips": ["194.99.104.1", "not-an-ip"]}
    ]}
}"#;

/// The same providers with one more server
pub const FEED_V2: &str = r#"{
    "version": 1,
    "mullvad": {"version": 5, "timestamp": 1700086400, "servers": [
        {"country": "Sweden", "city": "Stockholm", "hostname": "se-sto-wg-001",
         "ips": ["185.65.134.10", "2a03:1b20:1::10"]},
        {"country": "Norway", "city": "Oslo", "hostname": "no-osl-001", "ips": ["91.90.44.1"]}
    ]},
    "nordvpn": {"version": 2, "timestamp": 1700000100, "servers": [
        {"country": "Germany", "city": "Berlin", "hostname": "de100.nordvpn.com",
         "ips": ["194.99.104.1"]}
    ]}
}"#;

/// Updater config suitable for tests: enabled, fast retries
pub fn test_config() -> UpdaterConfig {
    UpdaterConfig {
        enabled: true,
        source_url: "https://feeds.example.test/servers.json".to_string(),
        update_interval_secs: 3600,
        http_timeout_secs: 5,
        retry_attempts: 3,
        retry_delay_ms: 10,
        event_channel_capacity: 64,
    }
}

/// A fetcher that replays a script of responses
///
/// Once the script is exhausted the last entry repeats.
pub struct ScriptedFetcher {
    script: Arc<std::sync::Mutex<VecDeque<Result<Vec<u8>>>>>,
    last: Arc<std::sync::Mutex<Option<std::result::Result<Vec<u8>, String>>>>,
    delay: Duration,
    call_count: Arc<AtomicUsize>,
    requests: Arc<std::sync::Mutex<Vec<FetchRequest>>>,
    started_at: Arc<std::sync::Mutex<Vec<DateTime<Utc>>>>,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<Result<Vec<u8>>>) -> Self {
        Self {
            script: Arc::new(std::sync::Mutex::new(script.into())),
            last: Arc::new(std::sync::Mutex::new(None)),
            delay: Duration::ZERO,
            call_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(std::sync::Mutex::new(Vec::new())),
            started_at: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Always return the same payload
    pub fn always(payload: &str) -> Self {
        Self::new(vec![Ok(payload.as_bytes().to_vec())])
    }

    /// Fail `failures` times, then return `payload`
    pub fn failing_then(failures: usize, payload: &str) -> Self {
        let mut script: Vec<Result<Vec<u8>>> = (0..failures)
            .map(|i| Err(Error::fetch(format!("connection reset #{i}"))))
            .collect();
        script.push(Ok(payload.as_bytes().to_vec()));
        Self::new(script)
    }

    /// Always fail
    pub fn always_failing() -> Self {
        Self::new(vec![Err(Error::Http { status: 503 })])
    }

    /// Sleep before every response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue more responses
    pub fn push(&self, response: Result<Vec<u8>>) {
        self.script.lock().unwrap().push_back(response);
    }

    /// Get the number of times fetch() was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Wall-clock time at which each fetch() call began
    pub fn started_at(&self) -> Vec<DateTime<Utc>> {
        self.started_at.lock().unwrap().clone()
    }

    /// Create a fetcher that shares script and counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            script: Arc::clone(&other.script),
            last: Arc::clone(&other.last),
            delay: other.delay,
            call_count: Arc::clone(&other.call_count),
            requests: Arc::clone(&other.requests),
            started_at: Arc::clone(&other.started_at),
        }
    }

    fn next_response(&self) -> Result<Vec<u8>> {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();

        if let Some(next) = script.pop_front() {
            *last = Some(match &next {
                Ok(data) => Ok(data.clone()),
                Err(e) => Err(e.to_string()),
            });
            return next;
        }

        match last.as_ref() {
            Some(Ok(data)) => Ok(data.clone()),
            Some(Err(msg)) => Err(Error::fetch(msg.clone())),
            None => Err(Error::fetch("empty script")),
        }
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>> {
        self.started_at.lock().unwrap().push(Utc::now());
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.next_response()
    }

    fn fetcher_name(&self) -> &'static str {
        "scripted"
    }
}

/// A store whose writes always fail
///
/// Reads delegate to an inner MemoryStore.
pub struct BrokenStore {
    inner: MemoryStore,
    write_attempts: Arc<AtomicUsize>,
}

impl BrokenStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            write_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn fail(&self) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::store("disk full"))
    }
}

#[async_trait]
impl VpnStore for BrokenStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn save_provider(&self, _provider: &Provider) -> Result<()> {
        self.fail()
    }

    async fn get_provider(&self, name: &str) -> Result<Option<Provider>> {
        self.inner.get_provider(name).await
    }

    async fn list_providers(&self) -> Result<Vec<Provider>> {
        self.inner.list_providers().await
    }

    async fn save_ip(&self, _record: &IpRecord) -> Result<()> {
        self.fail()
    }

    async fn bulk_save_ips(&self, _records: &[IpRecord]) -> Result<()> {
        self.fail()
    }

    async fn list_ips(&self) -> Result<Vec<IpRecord>> {
        Err(Error::store("table missing"))
    }

    async fn is_vpn_ip(&self, ip: &str) -> Result<bool> {
        self.inner.is_vpn_ip(ip).await
    }

    async fn get_vpn_info(&self, ip: &str) -> Result<LookupResult> {
        self.inner.get_vpn_info(ip).await
    }

    async fn get_servers(&self, provider: &str) -> Result<Vec<Server>> {
        self.inner.get_servers(provider).await
    }

    async fn get_stats(&self) -> Result<Stats> {
        self.inner.get_stats().await
    }

    async fn clear(&self) -> Result<()> {
        self.fail()
    }

    async fn replace_all(&self, _providers: &[Provider], _ips: &[IpRecord]) -> Result<()> {
        self.fail()
    }

    async fn save_metadata(&self, _rows: &[(String, String)]) -> Result<()> {
        self.fail()
    }

    async fn load_metadata(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }

    fn store_name(&self) -> &'static str {
        "broken"
    }
}
