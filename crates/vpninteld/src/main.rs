// # vpninteld - VPN IP-Intelligence Daemon
//
// Thin integration layer: all classification, import and refresh logic
// lives in vpnintel-core. The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing the runtime and logging
// 3. Building the store, the service and (optionally) the updater
// 4. Stopping the refresh loop cleanly on SIGTERM/SIGINT
//
// ## Configuration
//
// ### Service
// - `VPNINTEL_ENABLED`: Whether lookups consult the cache (default true)
// - `VPNINTEL_CACHE_SIZE`: Capacity hint for the address maps
// - `VPNINTEL_DATA_FILE`: JSON feed file imported at startup (optional)
//
// ### Store
// - `VPNINTEL_STORE_TYPE`: memory or sqlite (default memory)
// - `VPNINTEL_STORE_PATH`: Database file (for sqlite)
//
// ### Updater
// - `VPNINTEL_AUTO_UPDATE`: Run the periodic refresh (default false)
// - `VPNINTEL_SOURCE_URL`: Feed URL (default: gluetun servers.json)
// - `VPNINTEL_UPDATE_INTERVAL_SECS`: Refresh interval
// - `VPNINTEL_HTTP_TIMEOUT_SECS`: Per-attempt fetch deadline
// - `VPNINTEL_RETRY_ATTEMPTS`: Total fetch attempts per refresh (1-10)
// - `VPNINTEL_RETRY_DELAY_MS`: First backoff delay, doubled per retry
//
// ### Logging
// - `VPNINTEL_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export VPNINTEL_STORE_TYPE=sqlite
// export VPNINTEL_STORE_PATH=/var/lib/vpnintel/vpn.db
// export VPNINTEL_AUTO_UPDATE=true
//
// vpninteld
// ```

mod config;

use anyhow::{Result, bail};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use vpnintel_core::{MemoryStore, StoreConfig, Updater, VpnService, VpnStore};

use crate::config::Config;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long the refresh loop gets to wind down after a signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DaemonExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DaemonExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    info!("Starting vpninteld daemon");
    info!(
        "Configuration loaded: store={}, auto_update={}",
        config.vpnintel.store.type_name(),
        config.vpnintel.service.auto_update
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DaemonExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            DaemonExitCode::RuntimeError
        } else {
            DaemonExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon until a shutdown signal arrives
async fn run_daemon(config: Config) -> Result<()> {
    let store = build_store(&config.vpnintel.store)?;
    let service = Arc::new(VpnService::new(
        Some(store),
        Some(config.vpnintel.service.clone()),
    ));
    service.initialize().await?;

    if let Some(path) = &config.vpnintel.service.data_file {
        // A broken seed file leaves whatever the store restored
        match service.import_from_file(path).await {
            Ok(result) => info!(
                "Imported {}: {} provider(s), {} address(es) in {:?}",
                path, result.providers_imported, result.ips_imported, result.duration
            ),
            Err(e) => warn!("Failed to import data file {}: {}", path, e),
        }
    }

    let shutdown = CancellationToken::new();
    let updater = if config.vpnintel.service.auto_update {
        Some(start_updater(&config, &service, &shutdown).await?)
    } else {
        info!("Automatic updates disabled");
        None
    };

    let stats = service.get_stats();
    info!(
        "VPN cache ready: {} provider(s), {} server(s), {} address(es) ({} IPv4, {} IPv6)",
        stats.total_providers,
        stats.total_servers,
        stats.total_ips,
        stats.ipv4_count,
        stats.ipv6_count
    );

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);

    shutdown.cancel();
    if let Some(updater) = updater
        && tokio::time::timeout(SHUTDOWN_TIMEOUT, updater.stop())
            .await
            .is_err()
    {
        bail!("Updater did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }

    info!("Shutting down daemon");
    Ok(())
}

/// Create the configured durable store
fn build_store(config: &StoreConfig) -> Result<Arc<dyn VpnStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "sqlite")]
        StoreConfig::Sqlite { path } => {
            info!("Opening SQLite store at {}", path);
            Ok(Arc::new(vpnintel_store_sqlite::SqliteStore::open(path)?))
        }
        #[cfg(not(feature = "sqlite"))]
        StoreConfig::Sqlite { .. } => bail!("SQLite store support is not compiled in"),
    }
}

/// Create the updater, restore its status and start the periodic loop
#[cfg(feature = "http")]
async fn start_updater(
    config: &Config,
    service: &Arc<VpnService>,
    shutdown: &CancellationToken,
) -> Result<Arc<Updater>> {
    let updater_config = config.vpnintel.updater.clone();
    let fetcher = Arc::new(vpnintel_fetch_http::HttpFeedFetcher::new(
        updater_config.http_timeout(),
    ));

    let (updater, mut events) = Updater::new(Arc::clone(service), fetcher, updater_config)?;
    let updater = Arc::new(updater);

    if let Err(e) = updater.load_status().await {
        warn!("Failed to restore update status: {}", e);
    }

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!("Updater event: {:?}", event);
        }
    });

    if updater.start(shutdown.clone()) {
        info!(
            "Automatic updates every {:?} from {}",
            config.vpnintel.updater.update_interval(),
            config.vpnintel.updater.source_url
        );
    }

    Ok(updater)
}

#[cfg(not(feature = "http"))]
async fn start_updater(
    _config: &Config,
    _service: &Arc<VpnService>,
    _shutdown: &CancellationToken,
) -> Result<Arc<Updater>> {
    bail!("HTTP fetch support is not compiled in")
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
