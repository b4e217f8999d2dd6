//! Service facade
//!
//! Single entry point for the enrichment pipeline. Wraps the classifier, the
//! importer and an optional durable store behind an enable switch.
//!
//! ## Locking
//!
//! - The enable flag lives in a synchronous reader/writer lock so the lookup
//!   path never awaits.
//! - Import, persist and reload are sequenced by an async mutex held across
//!   their `.await` points.
//! - Cache contents are guarded by the classifier's own lock.

use chrono::Utc;
use parking_lot::RwLock;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::import::Importer;
use crate::lookup::Lookup;
use crate::traits::VpnStore;
use crate::types::{EnrichedGeolocation, ImportResult, LookupResult, Provider, Stats};

/// VPN detection facade
pub struct VpnService {
    config: RwLock<ServiceConfig>,
    lookup: Arc<Lookup>,
    importer: Importer,
    store: Option<Arc<dyn VpnStore>>,
    ops: Mutex<()>,
}

impl VpnService {
    /// Create a service
    ///
    /// # Parameters
    ///
    /// - `store`: Durable store, or `None` to run purely in memory
    /// - `config`: Service settings, or `None` for defaults
    pub fn new(store: Option<Arc<dyn VpnStore>>, config: Option<ServiceConfig>) -> Self {
        let config = config.unwrap_or_default();
        let lookup = Arc::new(Lookup::with_capacity(config.cache_size));

        Self {
            config: RwLock::new(config),
            importer: Importer::new(Arc::clone(&lookup)),
            lookup,
            store,
            ops: Mutex::new(()),
        }
    }

    /// Prepare the store and load any persisted addresses
    ///
    /// Schema errors are returned. A failed load is logged and the service
    /// continues with an empty cache.
    pub async fn initialize(&self) -> Result<()> {
        let Some(store) = &self.store else {
            debug!("No store configured, starting with an empty cache");
            return Ok(());
        };

        let _guard = self.ops.lock().await;
        store.init_schema().await?;

        match store.load_into_lookup(&self.lookup).await {
            Ok(count) => info!(
                "Loaded {} VPN address(es) from {} store",
                count,
                store.store_name()
            ),
            Err(e) => warn!("Failed to load VPN data from store, starting empty: {}", e),
        }

        Ok(())
    }

    /// Whether the address belongs to a known VPN exit
    pub fn is_vpn(&self, ip: &str) -> bool {
        if !self.enabled() {
            return false;
        }
        self.lookup.contains_ip(ip)
    }

    /// Classify an address
    ///
    /// When the service is disabled this returns a zero-confidence negative
    /// without consulting the cache.
    pub fn lookup_ip(&self, ip: &str) -> LookupResult {
        if !self.enabled() {
            return LookupResult::default();
        }
        self.lookup.lookup_ip(ip)
    }

    /// Attach the VPN classification to a geolocation record
    pub fn enrich_with_vpn_info(
        &self,
        ip: &str,
        latitude: f64,
        longitude: f64,
        city: &str,
        region: &str,
        country: &str,
    ) -> EnrichedGeolocation {
        let vpn = self.lookup_ip(ip);

        EnrichedGeolocation {
            ip_address: ip.to_string(),
            latitude,
            longitude,
            city: city.to_string(),
            region: region.to_string(),
            country: country.to_string(),
            last_updated: Utc::now(),
            is_vpn: vpn.is_vpn,
            vpn_provider: vpn.provider,
            vpn_provider_display: vpn.provider_display,
            vpn_server_country: vpn.server_country,
            vpn_server_city: vpn.server_city,
            vpn_confidence: vpn.confidence,
        }
    }

    /// Snapshot of the classifier counters
    pub fn get_stats(&self) -> Stats {
        self.lookup.get_stats()
    }

    /// Get a provider by identifier
    pub fn get_provider(&self, name: &str) -> Option<Provider> {
        self.lookup.get_provider(name)
    }

    /// All cached providers
    pub fn list_providers(&self) -> Vec<Provider> {
        self.lookup.list_providers()
    }

    /// Switch lookups on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.config.write().enabled = enabled;
        info!("VPN detection {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Whether lookups consult the cache
    pub fn enabled(&self) -> bool {
        self.config.read().enabled
    }

    /// Current settings
    pub fn config(&self) -> ServiceConfig {
        self.config.read().clone()
    }

    /// The underlying classifier
    pub fn lookup(&self) -> &Arc<Lookup> {
        &self.lookup
    }

    /// The durable store, if any
    pub fn store(&self) -> Option<&Arc<dyn VpnStore>> {
        self.store.as_ref()
    }

    /// Replace the cache with a feed held in memory
    pub async fn import_from_bytes(&self, data: Vec<u8>) -> Result<ImportResult> {
        self.run_import(move |importer| importer.import_from_bytes(&data))
            .await
    }

    /// Replace the cache with a feed read from `reader`
    pub async fn import_from_reader<R>(&self, reader: R) -> Result<ImportResult>
    where
        R: Read + Send + 'static,
    {
        self.run_import(move |importer| importer.import_from_reader(reader))
            .await
    }

    /// Replace the cache with a feed stored on disk
    pub async fn import_from_file(&self, path: impl AsRef<Path>) -> Result<ImportResult> {
        let path: PathBuf = path.as_ref().to_path_buf();
        self.run_import(move |importer| importer.import_from_file(path))
            .await
    }

    /// Add a feed on top of the current cache
    pub async fn merge_from_reader<R>(&self, reader: R) -> Result<ImportResult>
    where
        R: Read + Send + 'static,
    {
        self.run_import(move |importer| importer.merge_from_reader(reader))
            .await
    }

    /// Rebuild the cache from the store
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Cache now mirrors the durable rows
    /// - `Err(Error::Store)`: No store configured, or the load failed
    pub async fn reload(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Err(Error::store("no store configured"));
        };

        let _guard = self.ops.lock().await;
        self.lookup.clear();
        let count = store.load_into_lookup(&self.lookup).await?;
        info!("Reloaded {} VPN address(es) from {} store", count, store.store_name());
        Ok(())
    }

    /// Run an import off the async runtime, then persist the result
    async fn run_import<F>(&self, f: F) -> Result<ImportResult>
    where
        F: FnOnce(&Importer) -> Result<ImportResult> + Send + 'static,
    {
        let _guard = self.ops.lock().await;

        let importer = self.importer.clone();
        let result = tokio::task::spawn_blocking(move || f(&importer))
            .await
            .map_err(|e| Error::Other(format!("import task failed: {}", e)))??;

        self.persist().await;
        Ok(result)
    }

    /// Write the cache to the store, logging instead of failing
    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };

        match store.save_from_lookup(&self.lookup).await {
            Ok(()) => debug!(
                "Persisted {} VPN address(es) to {} store",
                self.lookup.count(),
                store.store_name()
            ),
            Err(e) => warn!("Failed to persist VPN data: {}", e),
        }
    }
}
