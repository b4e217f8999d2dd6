//! Contract Test: Durable State Reconstruction
//!
//! The store must be able to rebuild the classifier after a restart, and
//! persistence failures must never take down lookups or refreshes.
//!
//! Constraints verified:
//! - Import -> restart -> initialize reproduces count() and every lookup
//! - reload() restores the durable view after in-memory divergence
//! - Refresh status survives a restart, so an unchanged feed stays a no-op
//! - Store write failures are logged, not returned

mod common;

use common::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vpnintel_core::traits::VpnStore;
use vpnintel_core::updater::content_hash;
use vpnintel_core::{MemoryStore, UpdateOutcome, Updater, VpnService};

const ADDRESSES: &[&str] = &[
    "185.65.134.10",
    "2a03:1b20:1::10",
    "185.65.134.20",
    "194.99.104.1",
];

#[tokio::test]
async fn restart_reproduces_classifier() {
    let store = Arc::new(MemoryStore::new());

    let before = VpnService::new(Some(store.clone()), None);
    before.initialize().await.unwrap();
    before
        .import_from_bytes(FEED_V1.as_bytes().to_vec())
        .await
        .unwrap();

    let after = VpnService::new(Some(store.clone()), None);
    after.initialize().await.unwrap();

    assert_eq!(after.lookup().count(), before.lookup().count());
    for ip in ADDRESSES {
        assert_eq!(after.lookup_ip(ip), before.lookup_ip(ip), "{ip}");
    }
    assert_eq!(after.list_providers().len(), 2);
    assert_eq!(after.get_provider("mullvad").unwrap().version, 4);

    let servers = store.get_servers("mullvad").await.unwrap();
    assert_eq!(servers.len(), 2);
}

#[tokio::test]
async fn reload_after_divergence() {
    let store = Arc::new(MemoryStore::new());
    let service = VpnService::new(Some(store), None);
    service.initialize().await.unwrap();
    service
        .import_from_bytes(FEED_V1.as_bytes().to_vec())
        .await
        .unwrap();

    service.lookup().clear();
    assert!(!service.is_vpn("194.99.104.1"));

    service.reload().await.unwrap();

    assert_eq!(service.lookup().count(), ADDRESSES.len());
    assert!(service.is_vpn("194.99.104.1"));
}

#[tokio::test]
async fn status_survives_restart() {
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(VpnService::new(Some(store.clone()), None));
    let (updater, _events) = Updater::new(
        Arc::clone(&service),
        Arc::new(ScriptedFetcher::always(FEED_V1)),
        test_config(),
    )
    .unwrap();

    updater.update_now(&CancellationToken::new()).await.unwrap();

    let persisted = store.load_update_status().await.unwrap();
    assert_eq!(persisted.data_hash, content_hash(FEED_V1.as_bytes()));
    assert_eq!(persisted.provider_versions.get("mullvad"), Some(&4));
    assert!(persisted.last_successful_update.is_some());

    // Simulated restart
    let service = Arc::new(VpnService::new(Some(store.clone()), None));
    service.initialize().await.unwrap();
    let (updater, _events) = Updater::new(
        Arc::clone(&service),
        Arc::new(ScriptedFetcher::always(FEED_V1)),
        test_config(),
    )
    .unwrap();
    updater.load_status().await.unwrap();
    assert_eq!(updater.status().data_hash, persisted.data_hash);

    let outcome = updater.update_now(&CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Unchanged);
    assert_eq!(service.lookup().count(), ADDRESSES.len());
}

#[tokio::test]
async fn store_failures_are_not_fatal() {
    let store = Arc::new(BrokenStore::new());
    let service = Arc::new(VpnService::new(Some(store.clone()), None));

    // list_ips fails: startup continues with an empty cache
    service.initialize().await.unwrap();
    assert_eq!(service.lookup().count(), 0);

    let result = service
        .import_from_bytes(FEED_V1.as_bytes().to_vec())
        .await
        .expect("import succeeds even though persisting fails");
    assert_eq!(result.ips_imported, 4);
    assert!(service.is_vpn("185.65.134.10"));

    let (updater, _events) = Updater::new(
        Arc::clone(&service),
        Arc::new(ScriptedFetcher::always(FEED_V2)),
        test_config(),
    )
    .unwrap();
    let outcome = updater.update_now(&CancellationToken::new()).await;
    assert!(matches!(outcome, Ok(UpdateOutcome::Imported(_))));

    // one failed replace per import, one failed status write
    assert_eq!(store.write_attempts(), 3);
}
