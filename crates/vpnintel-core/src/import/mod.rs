//! Feed ingestion
//!
//! Turns the upstream JSON server list into classifier entries.
//!
//! ## Wire format
//!
//! ```text
//! {
//!   "version": 1,
//!   "mullvad": {
//!     "version": 4,
//!     "timestamp": 1700000000,
//!     "servers": [ { "country": "Sweden", "hostname": "se1", "ips": ["192.0.2.1"] } ]
//!   }
//! }
//! ```
//!
//! The top-level `version` key is the global format version and is ignored.
//! A provider value or server entry that does not decode is skipped and
//! reported in [`ImportResult::errors`]; a `null` field reads as its default.
//! Only malformed top-level JSON, or a top-level value that is not an object,
//! fails the import, and it does so before the classifier is touched.

use chrono::Utc;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::lookup::Lookup;
use crate::providers;
use crate::types::{ImportResult, Provider, Server};

/// Reserved top-level key holding the global format version
pub const FORMAT_VERSION_KEY: &str = "version";

/// Read an explicit `null` as the field's default
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeedProvider {
    #[serde(deserialize_with = "null_as_default")]
    version: i64,
    #[serde(deserialize_with = "null_as_default")]
    timestamp: i64,
    #[serde(deserialize_with = "null_as_default")]
    servers: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeedServer {
    #[serde(deserialize_with = "null_as_default")]
    vpn: String,
    #[serde(deserialize_with = "null_as_default")]
    country: String,
    #[serde(deserialize_with = "null_as_default")]
    region: String,
    #[serde(deserialize_with = "null_as_default")]
    city: String,
    #[serde(deserialize_with = "null_as_default")]
    isp: String,
    #[serde(deserialize_with = "null_as_default")]
    owned: bool,
    #[serde(deserialize_with = "null_as_default")]
    number: u32,
    #[serde(deserialize_with = "null_as_default")]
    server_name: String,
    #[serde(deserialize_with = "null_as_default")]
    hostname: String,
    #[serde(deserialize_with = "null_as_default")]
    tcp: bool,
    #[serde(deserialize_with = "null_as_default")]
    udp: bool,
    #[serde(deserialize_with = "null_as_default")]
    wgpubkey: String,
    #[serde(deserialize_with = "null_as_default")]
    ips: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    categories: Vec<String>,
}

/// Unwrap the top-level object of a decoded feed
fn feed_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(Error::import("top-level payload must be a JSON object, got an array")),
        _ => Err(Error::import("top-level payload must be a JSON object")),
    }
}

impl FeedServer {
    fn into_server(self, provider: &str) -> Server {
        Server {
            provider: provider.to_string(),
            country: self.country,
            region: self.region,
            city: self.city,
            hostname: self.hostname,
            server_name: self.server_name,
            ips: self.ips,
            vpn_type: self.vpn,
            isp: self.isp,
            categories: self.categories,
            tcp: self.tcp,
            udp: self.udp,
            number: self.number,
        }
    }
}

/// Feed importer bound to one classifier
#[derive(Debug, Clone)]
pub struct Importer {
    lookup: Arc<Lookup>,
}

impl Importer {
    /// Create an importer writing into `lookup`
    pub fn new(lookup: Arc<Lookup>) -> Self {
        Self { lookup }
    }

    /// Replace the classifier contents with a feed read from `reader`
    pub fn import_from_reader<R: Read>(&self, reader: R) -> Result<ImportResult> {
        let started = Instant::now();
        let feed = feed_object(serde_json::from_reader(BufReader::new(reader))?)?;
        Ok(self.apply(feed, true, started))
    }

    /// Replace the classifier contents with a feed held in memory
    pub fn import_from_bytes(&self, data: &[u8]) -> Result<ImportResult> {
        let started = Instant::now();
        let feed = feed_object(serde_json::from_slice(data)?)?;
        Ok(self.apply(feed, true, started))
    }

    /// Replace the classifier contents with a feed stored on disk
    pub fn import_from_file(&self, path: impl AsRef<Path>) -> Result<ImportResult> {
        let path = path.as_ref();
        debug!("Importing VPN data from {}", path.display());
        let file = std::fs::File::open(path)?;
        self.import_from_reader(file)
    }

    /// Add a feed on top of the current classifier contents
    pub fn merge_from_reader<R: Read>(&self, reader: R) -> Result<ImportResult> {
        let started = Instant::now();
        let feed = feed_object(serde_json::from_reader(BufReader::new(reader))?)?;
        Ok(self.apply(feed, false, started))
    }

    fn apply(
        &self,
        feed: Map<String, Value>,
        replace: bool,
        started: Instant,
    ) -> ImportResult {
        if replace {
            self.lookup.clear();
        }

        let mut result = ImportResult::default();

        for (name, value) in feed {
            if name == FORMAT_VERSION_KEY {
                continue;
            }

            let entry: FeedProvider = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping provider {}: {}", name, e);
                    result.errors.push(format!("skipped provider {}: {}", name, e));
                    continue;
                }
            };

            let mut server_count = 0;
            let mut ip_count = 0;
            let mut dropped = 0;

            for (index, raw) in entry.servers.into_iter().enumerate() {
                let server = match serde_json::from_value::<FeedServer>(raw) {
                    Ok(server) => server.into_server(&name),
                    Err(e) => {
                        result
                            .errors
                            .push(format!("{}: skipped server #{}: {}", name, index, e));
                        continue;
                    }
                };

                let added = self.lookup.add_server(&server);
                dropped += server.ips.len() - added.valid;
                ip_count += added.inserted;
                server_count += 1;
            }

            if dropped > 0 {
                result
                    .errors
                    .push(format!("{}: dropped {} invalid address(es)", name, dropped));
            }

            self.lookup.add_provider(Provider {
                display_name: providers::display_name(&name).to_string(),
                name,
                website: String::new(),
                server_count,
                ip_count,
                version: entry.version,
                timestamp: entry.timestamp,
                last_updated: Some(Utc::now()),
            });

            result.providers_imported += 1;
            result.servers_imported += server_count;
            result.ips_imported += ip_count;
        }

        result.duration = started.elapsed();
        info!(
            providers = result.providers_imported,
            servers = result.servers_imported,
            ips = result.ips_imported,
            warnings = result.errors.len(),
            duration_ms = result.duration.as_millis() as u64,
            "Imported VPN data ({})",
            if replace { "replace" } else { "merge" }
        );

        result
    }
}
