// # Memory Store
//
// In-memory implementation of VpnStore.
//
// ## Purpose
//
// Gives the service a store with the same contract as the SQLite backend
// without touching disk. Useful for tests and for deployments that rebuild
// the cache from the upstream feed on every start.
//
// ## Crash Behavior
//
// - All rows and refresh status are lost on restart
// - The first refresh after a restart always re-imports (no known hash)

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::lookup::storage_key;
use crate::providers;
use crate::traits::store::{VpnStore, canonical_record, canonical_records};
use crate::types::{IpRecord, LookupResult, Provider, Server, Stats};

#[derive(Debug, Default)]
struct Tables {
    providers: HashMap<String, Provider>,
    ips: HashMap<String, IpRecord>,
    metadata: HashMap<String, String>,
}

/// In-memory store implementation
///
/// # Example
///
/// ```rust,no_run
/// use vpnintel_core::state::MemoryStore;
/// use vpnintel_core::traits::VpnStore;
/// use vpnintel_core::types::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///     store.init_schema().await?;
///
///     let server = Server {
///         provider: "mullvad".to_string(),
///         ips: vec!["192.0.2.1".to_string()],
///         ..Default::default()
///     };
///     store.save_server(&server).await?;
///
///     assert!(store.is_vpn_ip("192.0.2.1").await?);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of address rows
    pub async fn ip_count(&self) -> usize {
        self.inner.read().await.ips.len()
    }
}

fn sorted_providers(tables: &Tables) -> Vec<Provider> {
    let mut providers: Vec<Provider> = tables.providers.values().cloned().collect();
    providers.sort_by(|a, b| b.ip_count.cmp(&a.ip_count).then_with(|| a.name.cmp(&b.name)));
    providers
}

#[async_trait]
impl VpnStore for MemoryStore {
    async fn init_schema(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn save_provider(&self, provider: &Provider) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.providers.insert(provider.name.clone(), provider.clone());
        Ok(())
    }

    async fn get_provider(&self, name: &str) -> Result<Option<Provider>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.providers.get(name).cloned())
    }

    async fn list_providers(&self) -> Result<Vec<Provider>, Error> {
        let guard = self.inner.read().await;
        Ok(sorted_providers(&guard))
    }

    async fn save_ip(&self, record: &IpRecord) -> Result<(), Error> {
        let Some(record) = canonical_record(record) else {
            return Ok(());
        };
        let mut guard = self.inner.write().await;
        guard.ips.insert(record.ip_address.clone(), record);
        Ok(())
    }

    async fn bulk_save_ips(&self, records: &[IpRecord]) -> Result<(), Error> {
        let records = canonical_records(records);
        if records.is_empty() {
            return Ok(());
        }
        let mut guard = self.inner.write().await;
        for record in records {
            guard.ips.insert(record.ip_address.clone(), record);
        }
        Ok(())
    }

    async fn list_ips(&self) -> Result<Vec<IpRecord>, Error> {
        let guard = self.inner.read().await;
        let mut rows: Vec<IpRecord> = guard.ips.values().cloned().collect();
        rows.sort_by(|a, b| a.ip_address.cmp(&b.ip_address));
        Ok(rows)
    }

    async fn is_vpn_ip(&self, ip: &str) -> Result<bool, Error> {
        let guard = self.inner.read().await;
        Ok(guard.ips.contains_key(&storage_key(ip)))
    }

    async fn get_vpn_info(&self, ip: &str) -> Result<LookupResult, Error> {
        let guard = self.inner.read().await;
        Ok(match guard.ips.get(&storage_key(ip)) {
            Some(row) => LookupResult {
                is_vpn: true,
                provider: row.provider.clone(),
                provider_display: providers::display_name(&row.provider).to_string(),
                server_country: row.country.clone(),
                server_city: row.city.clone(),
                hostname: row.hostname.clone(),
                confidence: 100,
            },
            None => LookupResult::not_found(),
        })
    }

    async fn get_servers(&self, provider: &str) -> Result<Vec<Server>, Error> {
        let guard = self.inner.read().await;
        let mut groups: BTreeMap<(String, String, String), Vec<String>> = BTreeMap::new();

        for row in guard.ips.values().filter(|r| r.provider == provider) {
            groups
                .entry((row.hostname.clone(), row.country.clone(), row.city.clone()))
                .or_default()
                .push(row.ip_address.clone());
        }

        Ok(groups
            .into_iter()
            .map(|((hostname, country, city), mut ips)| {
                ips.sort();
                Server {
                    provider: provider.to_string(),
                    country,
                    city,
                    hostname,
                    ips,
                    ..Default::default()
                }
            })
            .collect())
    }

    async fn get_stats(&self) -> Result<Stats, Error> {
        let guard = self.inner.read().await;

        let mut stats = Stats {
            total_ips: guard.ips.len(),
            provider_stats: sorted_providers(&guard),
            last_updated: guard.providers.values().filter_map(|p| p.last_updated).max(),
            ..Default::default()
        };

        let mut providers = std::collections::HashSet::new();
        let mut hostnames = std::collections::HashSet::new();
        for row in guard.ips.values() {
            providers.insert(row.provider.as_str());
            if !row.hostname.is_empty() {
                hostnames.insert(row.hostname.as_str());
            }
            if row.ip_address.contains(':') {
                stats.ipv6_count += 1;
            } else {
                stats.ipv4_count += 1;
            }
        }
        stats.total_providers = providers.len();
        stats.total_servers = hostnames.len();

        Ok(stats)
    }

    async fn clear(&self) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.ips.clear();
        guard.providers.clear();
        Ok(())
    }

    async fn replace_all(&self, providers: &[Provider], ips: &[IpRecord]) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.providers = providers
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        guard.ips = canonical_records(ips)
            .into_iter()
            .map(|r| (r.ip_address.clone(), r))
            .collect();
        Ok(())
    }

    async fn save_metadata(&self, rows: &[(String, String)]) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        for (key, value) in rows {
            guard.metadata.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn load_metadata(&self) -> Result<HashMap<String, String>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.metadata.clone())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::Lookup;
    use crate::types::UpdateStatus;

    fn record(ip: &str, provider: &str, hostname: &str) -> IpRecord {
        IpRecord {
            ip_address: ip.to_string(),
            provider: provider.to_string(),
            country: "Sweden".to_string(),
            city: "Stockholm".to_string(),
            hostname: hostname.to_string(),
            ..Default::default()
        }
    }

    fn provider(name: &str, ip_count: usize) -> Provider {
        Provider {
            name: name.to_string(),
            display_name: providers::display_name(name).to_string(),
            ip_count,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_memory_store_keys_rows_by_canonical_address() {
        let store = MemoryStore::new();

        store.save_ip(&record("2001:DB8::1", "mullvad", "se1")).await.unwrap();
        assert!(store.is_vpn_ip("2001:DB8::1").await.unwrap());
        assert!(store.is_vpn_ip("2001:db8::1").await.unwrap());

        store
            .bulk_save_ips(&[
                record("2001:0db8:0:0::2", "mullvad", "se1"),
                record("2001:db8::2", "nordvpn", "nl1"),
                record("not-an-ip", "nordvpn", "nl1"),
            ])
            .await
            .unwrap();
        store.save_ip(&record("bogus", "ivpn", "x")).await.unwrap();

        let rows = store.list_ips().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ip_address, "2001:db8::1");
        assert_eq!(rows[1].ip_address, "2001:db8::2");
        assert_eq!(store.get_vpn_info("2001:DB8:0::2").await.unwrap().provider, "nordvpn");

        let lookup = crate::lookup::Lookup::new();
        assert_eq!(store.load_into_lookup(&lookup).await.unwrap(), 2);
        assert_eq!(lookup.count(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_ip_upsert() {
        let store = MemoryStore::new();

        store.save_ip(&record("192.0.2.1", "mullvad", "se1")).await.unwrap();
        store.save_ip(&record("192.0.2.1", "nordvpn", "se2")).await.unwrap();

        assert_eq!(store.ip_count().await, 1);
        let info = store.get_vpn_info("192.0.2.1").await.unwrap();
        assert!(info.is_vpn);
        assert_eq!(info.provider, "nordvpn");
        assert_eq!(info.provider_display, "NordVPN");

        let missing = store.get_vpn_info("192.0.2.9").await.unwrap();
        assert_eq!(missing, LookupResult::not_found());
    }

    #[tokio::test]
    async fn test_memory_store_providers_ordered_by_ip_count() {
        let store = MemoryStore::new();
        store.save_provider(&provider("mullvad", 5)).await.unwrap();
        store.save_provider(&provider("nordvpn", 50)).await.unwrap();
        store.save_provider(&provider("mullvad", 7)).await.unwrap();

        let providers = store.list_providers().await.unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].name, "nordvpn");
        assert_eq!(providers[1].ip_count, 7);
        assert!(store.get_provider("ivpn").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_get_servers_groups_by_hostname() {
        let store = MemoryStore::new();
        store
            .bulk_save_ips(&[
                record("192.0.2.2", "mullvad", "se1"),
                record("192.0.2.1", "mullvad", "se1"),
                record("2001:db8::1", "mullvad", "se2"),
                record("198.51.100.1", "nordvpn", "se1"),
            ])
            .await
            .unwrap();

        let servers = store.get_servers("mullvad").await.unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].hostname, "se1");
        assert_eq!(servers[0].ips, vec!["192.0.2.1", "192.0.2.2"]);
        assert_eq!(servers[1].ips, vec!["2001:db8::1"]);
    }

    #[tokio::test]
    async fn test_memory_store_stats() {
        let store = MemoryStore::new();
        store
            .bulk_save_ips(&[
                record("192.0.2.1", "mullvad", "se1"),
                record("192.0.2.2", "mullvad", ""),
                record("2001:db8::1", "nordvpn", "us1"),
            ])
            .await
            .unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_ips, 3);
        assert_eq!(stats.ipv4_count, 2);
        assert_eq!(stats.ipv6_count, 1);
        assert_eq!(stats.total_providers, 2);
        assert_eq!(stats.total_servers, 2);
    }

    #[tokio::test]
    async fn test_memory_store_clear_keeps_metadata() {
        let store = MemoryStore::new();
        store.save_ip(&record("192.0.2.1", "mullvad", "se1")).await.unwrap();
        store.save_provider(&provider("mullvad", 1)).await.unwrap();
        let status = UpdateStatus {
            data_hash: "deadbeef".to_string(),
            ..Default::default()
        };
        store.save_update_status(&status).await.unwrap();

        store.clear().await.unwrap();

        assert_eq!(store.ip_count().await, 0);
        assert!(store.list_providers().await.unwrap().is_empty());
        assert_eq!(store.load_update_status().await.unwrap().data_hash, "deadbeef");
    }

    #[tokio::test]
    async fn test_memory_store_save_server_skips_invalid() {
        let store = MemoryStore::new();
        let server = Server {
            provider: "ivpn".to_string(),
            hostname: "nl1".to_string(),
            ips: vec!["192.0.2.1".to_string(), "garbage".to_string(), "::ffff:192.0.2.2".to_string()],
            ..Default::default()
        };

        store.save_server(&server).await.unwrap();

        assert_eq!(store.ip_count().await, 2);
        assert!(store.is_vpn_ip("192.0.2.2").await.unwrap());
        assert!(store.is_vpn_ip("::ffff:192.0.2.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_lookup_roundtrip() {
        let store = MemoryStore::new();
        let source = Lookup::new();
        source.add_server(&Server {
            provider: "mullvad".to_string(),
            hostname: "se1".to_string(),
            ips: vec!["192.0.2.1".to_string(), "2001:db8::1".to_string()],
            ..Default::default()
        });
        source.add_server(&Server {
            provider: "mullvad".to_string(),
            ips: vec!["192.0.2.7".to_string()],
            ..Default::default()
        });
        source.add_provider(provider("mullvad", 3));

        store.save_from_lookup(&source).await.unwrap();

        let restored = Lookup::new();
        let loaded = store.load_into_lookup(&restored).await.unwrap();

        assert_eq!(loaded, 3);
        assert_eq!(restored.count(), source.count());
        assert_eq!(restored.get_stats().total_servers, 2);
        for ip in ["192.0.2.1", "2001:db8::1", "192.0.2.7"] {
            assert_eq!(restored.lookup_ip(ip), source.lookup_ip(ip), "{ip}");
        }
        assert_eq!(restored.get_provider("mullvad").unwrap().ip_count, 3);
    }
}
