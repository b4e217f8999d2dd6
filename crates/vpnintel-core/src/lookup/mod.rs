//! Address classifier
//!
//! Exact-match cache from parsed addresses to the VPN server that owns them.
//!
//! ## Locking
//!
//! One reader/writer lock covers both address maps, the provider map and the
//! counters. Writers (`add_server`, `add_provider`, `clear`) hold it for the
//! whole call, so readers see either the state before or after a call, never
//! a half-applied one. Across an import there is no such guarantee.
//!
//! ## Canonical keys
//!
//! Addresses are parsed with the standard library and then canonicalised, so
//! `::ffff:192.0.2.1` and `192.0.2.1` share one key. Text is not trimmed.

use crate::providers;
use crate::types::{IpRecord, LookupResult, Provider, Server, Stats};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Per-address metadata, shared by every address of one server
#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheEntry {
    provider: String,
    country: String,
    city: String,
    hostname: String,
    server_name: String,
}

impl CacheEntry {
    fn from_server(server: &Server) -> Self {
        Self {
            provider: server.provider.clone(),
            country: server.country.clone(),
            city: server.city.clone(),
            hostname: server.hostname.clone(),
            server_name: server.server_name.clone(),
        }
    }

    fn to_result(&self) -> LookupResult {
        LookupResult {
            is_vpn: true,
            provider: self.provider.clone(),
            provider_display: providers::display_name(&self.provider).to_string(),
            server_country: self.country.clone(),
            server_city: self.city.clone(),
            hostname: self.hostname.clone(),
            confidence: 100,
        }
    }

    fn to_record(&self, ip: IpAddr) -> IpRecord {
        IpRecord {
            ip_address: ip.to_string(),
            provider: self.provider.clone(),
            country: self.country.clone(),
            city: self.city.clone(),
            hostname: self.hostname.clone(),
            server_name: self.server_name.clone(),
            added_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    v4: HashMap<Ipv4Addr, Arc<CacheEntry>>,
    v6: HashMap<Ipv6Addr, Arc<CacheEntry>>,
    providers: HashMap<String, Provider>,
    stats: Stats,
}

impl Inner {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            v4: HashMap::with_capacity(capacity),
            v6: HashMap::with_capacity(capacity / 4),
            ..Default::default()
        }
    }
}

/// Concurrent VPN address classifier
#[derive(Debug)]
pub struct Lookup {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl Lookup {
    /// Create an empty classifier
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty classifier with room for `capacity` addresses
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::with_capacity(capacity)),
            capacity,
        }
    }

    /// Add every valid address of a server
    ///
    /// Addresses that do not parse are skipped; the rest are still added.
    /// An address already cached is overwritten (last writer wins).
    /// The server counter moves even when no address was valid.
    pub fn add_server(&self, server: &Server) -> AddedAddresses {
        let entry = Arc::new(CacheEntry::from_server(server));
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let mut added = AddedAddresses::default();

        for text in &server.ips {
            let Some(ip) = parse_ip(text) else {
                continue;
            };
            added.valid += 1;

            let fresh = match ip {
                IpAddr::V4(v4) => {
                    let fresh = inner.v4.insert(v4, Arc::clone(&entry)).is_none();
                    if fresh {
                        inner.stats.ipv4_count += 1;
                    }
                    fresh
                }
                IpAddr::V6(v6) => {
                    let fresh = inner.v6.insert(v6, Arc::clone(&entry)).is_none();
                    if fresh {
                        inner.stats.ipv6_count += 1;
                    }
                    fresh
                }
            };
            if fresh {
                inner.stats.total_ips += 1;
                added.inserted += 1;
            }
        }

        inner.stats.total_servers += 1;
        added
    }

    /// Insert or replace a provider
    pub fn add_provider(&self, provider: Provider) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        match inner
            .stats
            .provider_stats
            .iter_mut()
            .find(|p| p.name == provider.name)
        {
            Some(existing) => *existing = provider.clone(),
            None => inner.stats.provider_stats.push(provider.clone()),
        }

        if inner.providers.insert(provider.name.clone(), provider).is_none() {
            inner.stats.total_providers += 1;
        }
        inner.stats.last_updated = Some(Utc::now());
    }

    /// Classify an address
    ///
    /// Never fails: unparseable input yields a zero-confidence negative.
    pub fn lookup_ip(&self, text: &str) -> LookupResult {
        let Some(ip) = parse_ip(text) else {
            return LookupResult::default();
        };

        let guard = self.inner.read();
        let entry = match ip {
            IpAddr::V4(v4) => guard.v4.get(&v4),
            IpAddr::V6(v6) => guard.v6.get(&v6),
        };

        entry
            .map(|e| e.to_result())
            .unwrap_or_else(LookupResult::not_found)
    }

    /// Whether the address is a known VPN exit
    pub fn contains_ip(&self, text: &str) -> bool {
        let Some(ip) = parse_ip(text) else {
            return false;
        };

        let guard = self.inner.read();
        match ip {
            IpAddr::V4(v4) => guard.v4.contains_key(&v4),
            IpAddr::V6(v6) => guard.v6.contains_key(&v6),
        }
    }

    /// Snapshot of the counters
    pub fn get_stats(&self) -> Stats {
        self.inner.read().stats.clone()
    }

    /// Get a provider by identifier
    pub fn get_provider(&self, name: &str) -> Option<Provider> {
        self.inner.read().providers.get(name).cloned()
    }

    /// All providers in insertion order
    pub fn list_providers(&self) -> Vec<Provider> {
        self.inner.read().stats.provider_stats.clone()
    }

    /// Number of cached addresses
    pub fn count(&self) -> usize {
        let guard = self.inner.read();
        guard.v4.len() + guard.v6.len()
    }

    /// Whether no address is cached
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Discard every address and provider and reset the counters
    pub fn clear(&self) {
        *self.inner.write() = Inner::with_capacity(self.capacity);
    }

    /// Snapshot of every cached address with its metadata
    pub fn entries(&self) -> Vec<IpRecord> {
        let guard = self.inner.read();
        let v4 = guard.v4.iter().map(|(ip, e)| e.to_record(IpAddr::V4(*ip)));
        let v6 = guard.v6.iter().map(|(ip, e)| e.to_record(IpAddr::V6(*ip)));
        v4.chain(v6).collect()
    }

    pub(crate) fn set_last_updated(&self, when: chrono::DateTime<Utc>) {
        self.inner.write().stats.last_updated = Some(when);
    }
}

impl Default for Lookup {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse an address the way the classifier keys it
pub fn parse_ip(text: &str) -> Option<IpAddr> {
    text.parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

/// What one [`Lookup::add_server`] call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddedAddresses {
    /// Addresses that parsed
    pub valid: usize,
    /// Addresses that were not cached before the call
    pub inserted: usize,
}

/// Key under which an address is stored durably
///
/// Unparseable text is returned as-is so it simply never matches.
pub fn storage_key(text: &str) -> String {
    parse_ip(text)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| text.to_string())
}
