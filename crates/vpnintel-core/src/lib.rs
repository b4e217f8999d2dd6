// # vpnintel-core
//
// Core library for the VPN IP-intelligence cache.
//
// ## Architecture Overview
//
// - **Lookup**: Concurrent exact-match classifier from addresses to VPN servers
// - **Importer**: Parses the upstream JSON feed into classifier entries
// - **VpnStore**: Trait for durable storage; rebuilds the classifier on startup
// - **VpnService**: Facade behind an enable switch, used by the enrichment pipeline
// - **Updater**: Background refresh with retry, backoff and hash-based no-op detection
// - **FeedFetcher**: Trait for downloading the feed (one request per call)
//
// ## Data Flow
//
// Updater fetches bytes -> hash compared to the last import -> Importer
// replaces the classifier contents -> Service persists them to the store.
// Readers call VpnService::is_vpn / lookup_ip, which only touch the
// classifier's lock.

pub mod config;
pub mod error;
pub mod import;
pub mod lookup;
pub mod providers;
pub mod service;
pub mod state;
pub mod traits;
pub mod types;
pub mod updater;

// Re-export core types for convenience
pub use config::{ServiceConfig, StoreConfig, UpdaterConfig, VpnIntelConfig};
pub use error::{Error, Result};
pub use import::Importer;
pub use lookup::Lookup;
pub use service::VpnService;
pub use state::MemoryStore;
pub use traits::{FeedFetcher, FetchRequest, VpnStore};
pub use types::{
    EnrichedGeolocation, ImportResult, IpRecord, LookupResult, Provider, Server, Stats,
    UpdatePhase, UpdateStatus,
};
pub use updater::{UpdateOutcome, Updater, UpdaterEvent};
