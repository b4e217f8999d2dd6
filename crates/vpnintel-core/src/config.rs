//! Configuration types for the VPN intelligence cache
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upstream server list published by the gluetun project
pub const DEFAULT_SOURCE_URL: &str =
    "https://raw.githubusercontent.com/qdm12/gluetun/master/internal/storage/servers.json";

/// Aggregate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VpnIntelConfig {
    /// Facade settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Refresh pipeline settings
    #[serde(default)]
    pub updater: UpdaterConfig,

    /// Durable store backend
    #[serde(default)]
    pub store: StoreConfig,
}

impl VpnIntelConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.service.validate()?;
        self.updater.validate()?;
        self.store.validate()?;
        Ok(())
    }
}

/// Facade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Whether lookups consult the cache at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Initial capacity hint for the address maps
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Optional JSON file imported at startup
    #[serde(default)]
    pub data_file: Option<String>,

    /// Whether the refresh pipeline should run
    #[serde(default)]
    pub auto_update: bool,

    /// Refresh interval (in seconds)
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
}

impl ServiceConfig {
    /// Validate the service configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.auto_update && self.update_interval_secs == 0 {
            return Err(crate::Error::config("Update interval must be > 0"));
        }
        if let Some(path) = &self.data_file
            && path.is_empty()
        {
            return Err(crate::Error::config("Data file path cannot be empty"));
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            cache_size: default_cache_size(),
            data_file: None,
            auto_update: false,
            update_interval_secs: default_update_interval_secs(),
        }
    }
}

/// Refresh pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Whether the periodic loop runs
    #[serde(default)]
    pub enabled: bool,

    /// Feed URL
    #[serde(default = "default_source_url")]
    pub source_url: String,

    /// Interval between refreshes (in seconds)
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Deadline for a single fetch (in seconds)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Total fetch attempts per refresh
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    /// Delay before the first retry (in milliseconds), doubled on each retry
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Capacity of the updater event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl UpdaterConfig {
    /// Validate the updater configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_source_url(&self.source_url)?;
        if self.update_interval_secs == 0 {
            return Err(crate::Error::config("Update interval must be > 0"));
        }
        if self.http_timeout_secs == 0 {
            return Err(crate::Error::config("HTTP timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    /// Interval between refreshes
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    /// Deadline for a single fetch
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Delay before the first retry
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            source_url: default_source_url(),
            update_interval_secs: default_update_interval_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Check that a feed URL is usable
pub fn validate_source_url(url: &str) -> Result<(), crate::Error> {
    if url.is_empty() {
        return Err(crate::Error::config("Source URL cannot be empty"));
    }
    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(crate::Error::config(format!(
            "Source URL must use HTTP or HTTPS scheme. Got: {}",
            url
        )));
    }
    Ok(())
}

/// Durable store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// SQLite database file
    Sqlite {
        /// Path to the database file
        path: String,
    },
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::Sqlite { path } if path.is_empty() => {
                Err(crate::Error::config("SQLite store path cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &'static str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::Sqlite { .. } => "sqlite",
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_cache_size() -> usize {
    10_000
}

fn default_update_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_source_url() -> String {
    DEFAULT_SOURCE_URL.to_string()
}

fn default_http_timeout_secs() -> u64 {
    60
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_event_channel_capacity() -> usize {
    100
}
