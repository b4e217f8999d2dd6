// # VPN Store Trait
//
// Defines the interface for durable storage of the classifier's contents.
//
// ## Schema contract
//
// - providers: keyed by identifier, upsert on conflict
// - ips: keyed by canonical address text, upsert on conflict, indexed by provider
// - metadata: key/value rows holding the refresh pipeline status
//
// Optional columns read back as empty strings.
//
// ## Implementations
//
// - In-memory: `state::MemoryStore` (tests, no persistence)
// - SQLite: `vpnintel-store-sqlite` crate

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::lookup::{Lookup, parse_ip};
use crate::types::{IpRecord, LookupResult, Provider, Server, Stats, UpdateStatus};

/// A copy of `record` keyed by its canonical address text
///
/// # Returns
///
/// `None` when the address does not parse; such rows are never stored
pub fn canonical_record(record: &IpRecord) -> Option<IpRecord> {
    parse_ip(&record.ip_address).map(|ip| IpRecord {
        ip_address: ip.to_string(),
        ..record.clone()
    })
}

/// Canonical copies of every storable record, in input order
pub fn canonical_records(records: &[IpRecord]) -> Vec<IpRecord> {
    let rows: Vec<IpRecord> = records.iter().filter_map(canonical_record).collect();
    if rows.len() < records.len() {
        debug!(
            "Skipped {} unparseable address row(s)",
            records.len() - rows.len()
        );
    }
    rows
}

/// Trait for durable store implementations
///
/// Implementations handle their own internal concurrency; every method must
/// be safe to call from many tasks at once.
///
/// # Trust Level: Trusted (Core Component)
///
/// Stores perform I/O and nothing else. Deciding what to persist and when
/// belongs to `VpnService` and `Updater`.
#[async_trait]
pub trait VpnStore: Send + Sync {
    /// Create tables and indexes if absent
    async fn init_schema(&self) -> Result<(), crate::Error>;

    /// Insert or replace a provider
    async fn save_provider(&self, provider: &Provider) -> Result<(), crate::Error>;

    /// Get a provider by identifier
    async fn get_provider(&self, name: &str) -> Result<Option<Provider>, crate::Error>;

    /// All providers, largest `ip_count` first
    async fn list_providers(&self) -> Result<Vec<Provider>, crate::Error>;

    /// Insert or replace one address row
    async fn save_ip(&self, record: &IpRecord) -> Result<(), crate::Error>;

    /// Insert or replace many address rows in one transaction
    ///
    /// An empty slice is a no-op.
    async fn bulk_save_ips(&self, records: &[IpRecord]) -> Result<(), crate::Error>;

    /// Every address row
    async fn list_ips(&self) -> Result<Vec<IpRecord>, crate::Error>;

    /// Whether an address row exists
    async fn is_vpn_ip(&self, ip: &str) -> Result<bool, crate::Error>;

    /// Classify an address from durable rows
    ///
    /// A missing row is a confident negative, like the classifier.
    async fn get_vpn_info(&self, ip: &str) -> Result<LookupResult, crate::Error>;

    /// Reconstruct servers of one provider
    ///
    /// Rows are grouped by (hostname, country, city). Fields not stored per
    /// address (protocol flags, categories) come back empty.
    async fn get_servers(&self, provider: &str) -> Result<Vec<Server>, crate::Error>;

    /// Aggregate counts over the stored rows
    async fn get_stats(&self) -> Result<Stats, crate::Error>;

    /// Delete every provider and address row; metadata is kept
    async fn clear(&self) -> Result<(), crate::Error>;

    /// Replace all provider and address rows in one transaction
    async fn replace_all(
        &self,
        providers: &[Provider],
        ips: &[IpRecord],
    ) -> Result<(), crate::Error>;

    /// Upsert metadata rows
    async fn save_metadata(&self, rows: &[(String, String)]) -> Result<(), crate::Error>;

    /// Every metadata row
    async fn load_metadata(&self) -> Result<HashMap<String, String>, crate::Error>;

    /// Name used in logs
    fn store_name(&self) -> &'static str;

    /// Persist every valid address of a server
    ///
    /// Addresses are stored in canonical form; invalid ones are skipped.
    async fn save_server(&self, server: &Server) -> Result<(), crate::Error> {
        let now = Utc::now();
        let records: Vec<IpRecord> = server
            .ips
            .iter()
            .filter_map(|text| parse_ip(text))
            .map(|ip| IpRecord {
                ip_address: ip.to_string(),
                provider: server.provider.clone(),
                country: server.country.clone(),
                city: server.city.clone(),
                hostname: server.hostname.clone(),
                server_name: server.server_name.clone(),
                added_at: Some(now),
            })
            .collect();

        self.bulk_save_ips(&records).await
    }

    /// Persist the refresh pipeline status as metadata rows
    async fn save_update_status(&self, status: &UpdateStatus) -> Result<(), crate::Error> {
        self.save_metadata(&status.to_metadata()).await
    }

    /// Load the refresh pipeline status
    ///
    /// Missing or unparseable rows leave the matching field at its default.
    async fn load_update_status(&self) -> Result<UpdateStatus, crate::Error> {
        let rows = self.load_metadata().await?;
        Ok(UpdateStatus::from_metadata(&rows))
    }

    /// Rebuild the classifier from durable rows
    ///
    /// Address rows are grouped into servers by hostname, falling back to
    /// the address itself when the hostname is empty.
    ///
    /// # Returns
    ///
    /// The number of address rows read
    async fn load_into_lookup(&self, lookup: &Lookup) -> Result<usize, crate::Error> {
        let rows = self.list_ips().await?;
        let total = rows.len();

        let mut servers: BTreeMap<String, Server> = BTreeMap::new();
        for row in rows {
            let key = if row.hostname.is_empty() {
                row.ip_address.clone()
            } else {
                row.hostname.clone()
            };

            servers
                .entry(key)
                .or_insert_with(|| Server {
                    provider: row.provider.clone(),
                    country: row.country.clone(),
                    city: row.city.clone(),
                    hostname: row.hostname.clone(),
                    server_name: row.server_name.clone(),
                    ..Default::default()
                })
                .ips
                .push(row.ip_address);
        }

        for server in servers.values() {
            lookup.add_server(server);
        }

        for provider in self.list_providers().await? {
            lookup.add_provider(provider);
        }

        lookup.set_last_updated(Utc::now());
        debug!(
            "Loaded {} address(es) in {} server group(s) from {} store",
            total,
            servers.len(),
            self.store_name()
        );

        Ok(total)
    }

    /// Replace durable rows with the classifier's current contents
    async fn save_from_lookup(&self, lookup: &Lookup) -> Result<(), crate::Error> {
        let now = Utc::now();
        let providers = lookup.list_providers();
        let ips: Vec<IpRecord> = lookup
            .entries()
            .into_iter()
            .map(|record| IpRecord {
                added_at: Some(now),
                ..record
            })
            .collect();

        self.replace_all(&providers, &ips).await
    }
}
