//! Domain types shared by the classifier, importer, store and updater

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// One VPN exit server
///
/// Only exists during ingestion; the classifier decomposes it into
/// per-address entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub provider: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub hostname: String,
    pub server_name: String,
    /// Textual addresses, IPv4 or IPv6
    pub ips: Vec<String>,
    pub vpn_type: String,
    pub isp: String,
    pub categories: Vec<String>,
    pub tcp: bool,
    pub udp: bool,
    pub number: u32,
}

/// A VPN vendor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Identifier as used in the feed
    pub name: String,
    pub display_name: String,
    pub website: String,
    pub server_count: usize,
    pub ip_count: usize,
    /// Source format version
    pub version: i64,
    /// Source timestamp (unix seconds)
    pub timestamp: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Classification answer for one address
///
/// `confidence` is 0 only for input that does not parse as an address;
/// a well-formed address that is not cached is a confident negative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    pub is_vpn: bool,
    pub provider: String,
    pub provider_display: String,
    pub server_country: String,
    pub server_city: String,
    pub hostname: String,
    pub confidence: u8,
}

impl LookupResult {
    /// Result for a well-formed address that is not a known VPN exit
    pub fn not_found() -> Self {
        Self {
            confidence: 100,
            ..Default::default()
        }
    }
}

/// Aggregate classifier counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_providers: usize,
    pub total_servers: usize,
    pub total_ips: usize,
    pub ipv4_count: usize,
    pub ipv6_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
    /// Per-provider snapshot in insertion order
    pub provider_stats: Vec<Provider>,
}

/// One persisted address row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRecord {
    pub ip_address: String,
    pub provider: String,
    pub country: String,
    pub city: String,
    pub hostname: String,
    pub server_name: String,
    pub added_at: Option<DateTime<Utc>>,
}

/// Outcome of one ingestion pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub providers_imported: usize,
    pub servers_imported: usize,
    pub ips_imported: usize,
    /// Non-fatal warnings (skipped entries, dropped addresses)
    pub errors: Vec<String>,
    pub duration: Duration,
}

/// Geolocation record enriched with the VPN classification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedGeolocation {
    pub ip_address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub region: String,
    pub country: String,
    pub last_updated: DateTime<Utc>,
    pub is_vpn: bool,
    pub vpn_provider: String,
    pub vpn_provider_display: String,
    pub vpn_server_country: String,
    pub vpn_server_city: String,
    pub vpn_confidence: u8,
}

/// Refresh pipeline phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePhase {
    /// The periodic loop is switched off
    Disabled,
    /// Waiting for the next refresh
    #[default]
    Idle,
    /// Downloading the feed
    Fetching,
    /// Applying a changed payload
    Importing,
}

pub(crate) const KEY_LAST_ATTEMPT: &str = "last_update_attempt";
pub(crate) const KEY_LAST_SUCCESS: &str = "last_successful_update";
pub(crate) const KEY_LAST_ERROR: &str = "last_error";
pub(crate) const KEY_SOURCE_URL: &str = "source_url";
pub(crate) const KEY_DATA_HASH: &str = "data_hash";
pub(crate) const KEY_PROVIDER_VERSIONS: &str = "provider_versions";

/// Refresh pipeline state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub last_update_attempt: Option<DateTime<Utc>>,
    pub last_successful_update: Option<DateTime<Utc>>,
    pub last_error: String,
    pub source_url: String,
    /// SHA-256 of the last imported payload, lowercase hex
    pub data_hash: String,
    pub provider_versions: BTreeMap<String, i64>,
    pub last_import: Option<ImportResult>,
    pub next_scheduled: Option<DateTime<Utc>>,
    pub is_updating: bool,
    pub phase: UpdatePhase,
}

impl UpdateStatus {
    /// Flatten the durable fields into metadata rows
    ///
    /// Unset timestamps and empty strings are still written so a cleared
    /// error overwrites the previous one.
    pub fn to_metadata(&self) -> Vec<(String, String)> {
        let ts = |t: &Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_default();
        let versions = serde_json::to_string(&self.provider_versions).unwrap_or_default();

        vec![
            (KEY_LAST_ATTEMPT.to_string(), ts(&self.last_update_attempt)),
            (KEY_LAST_SUCCESS.to_string(), ts(&self.last_successful_update)),
            (KEY_LAST_ERROR.to_string(), self.last_error.clone()),
            (KEY_SOURCE_URL.to_string(), self.source_url.clone()),
            (KEY_DATA_HASH.to_string(), self.data_hash.clone()),
            (KEY_PROVIDER_VERSIONS.to_string(), versions),
        ]
    }

    /// Rebuild a status from metadata rows
    ///
    /// Values that do not parse are left at their defaults.
    pub fn from_metadata(rows: &HashMap<String, String>) -> Self {
        let ts = |key: &str| {
            rows.get(key)
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|t| t.with_timezone(&Utc))
        };
        let text = |key: &str| rows.get(key).cloned().unwrap_or_default();

        Self {
            last_update_attempt: ts(KEY_LAST_ATTEMPT),
            last_successful_update: ts(KEY_LAST_SUCCESS),
            last_error: text(KEY_LAST_ERROR),
            source_url: text(KEY_SOURCE_URL),
            data_hash: text(KEY_DATA_HASH),
            provider_versions: rows
                .get(KEY_PROVIDER_VERSIONS)
                .and_then(|v| serde_json::from_str(v).ok())
                .unwrap_or_default(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_metadata_roundtrip() {
        let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let status = UpdateStatus {
            last_update_attempt: Some(when),
            last_successful_update: Some(when),
            last_error: String::new(),
            source_url: "https://example.com/servers.json".to_string(),
            data_hash: "abc123".to_string(),
            provider_versions: BTreeMap::from([("mullvad".to_string(), 4)]),
            is_updating: true,
            ..Default::default()
        };

        let rows: HashMap<_, _> = status.to_metadata().into_iter().collect();
        let restored = UpdateStatus::from_metadata(&rows);

        assert_eq!(restored.last_update_attempt, Some(when));
        assert_eq!(restored.last_successful_update, Some(when));
        assert_eq!(restored.source_url, status.source_url);
        assert_eq!(restored.data_hash, "abc123");
        assert_eq!(restored.provider_versions.get("mullvad"), Some(&4));
        // in-flight state is never persisted
        assert!(!restored.is_updating);
    }

    #[test]
    fn test_status_ignores_unparseable_values() {
        let rows = HashMap::from([
            (KEY_LAST_ATTEMPT.to_string(), "yesterday".to_string()),
            (KEY_PROVIDER_VERSIONS.to_string(), "[1,2".to_string()),
            (KEY_LAST_ERROR.to_string(), "timeout".to_string()),
        ]);

        let status = UpdateStatus::from_metadata(&rows);
        assert_eq!(status.last_update_attempt, None);
        assert!(status.provider_versions.is_empty());
        assert_eq!(status.last_error, "timeout");
    }

    #[test]
    fn test_not_found_is_confident() {
        let result = LookupResult::not_found();
        assert!(!result.is_vpn);
        assert_eq!(result.confidence, 100);
        assert_eq!(LookupResult::default().confidence, 0);
    }
}
