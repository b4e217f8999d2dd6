//! Collaborator traits for the VPN intelligence cache
//!
//! - [`VpnStore`]: Durable storage of providers, addresses and refresh status
//! - [`FeedFetcher`]: Single-shot download of the upstream feed

pub mod fetcher;
pub mod store;

pub use fetcher::{FeedFetcher, FetchRequest, MAX_RESPONSE_SIZE};
pub use store::{VpnStore, canonical_record, canonical_records};
