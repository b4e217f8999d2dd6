// # SQLite VPN Store
//
// Durable implementation of `VpnStore` on top of SQLite.
//
// ## Concurrency
//
// One connection behind a mutex. Every query runs on the blocking pool via
// `spawn_blocking`, so the async runtime never waits on disk I/O.
//
// ## Storage format
//
// - Timestamps are RFC 3339 text in UTC (microsecond precision, `Z` suffix),
//   so MAX() over them orders correctly
// - Optional columns may be NULL and read back as empty strings
// - Counts are stored as INTEGER and clamped to zero on read

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use vpnintel_core::lookup::storage_key;
use vpnintel_core::providers;
use vpnintel_core::traits::{VpnStore, canonical_record, canonical_records};
use vpnintel_core::types::{IpRecord, LookupResult, Provider, Server, Stats};
use vpnintel_core::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS vpn_providers (
    name TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    website TEXT,
    server_count INTEGER DEFAULT 0,
    ip_count INTEGER DEFAULT 0,
    version INTEGER DEFAULT 0,
    timestamp INTEGER DEFAULT 0,
    last_updated TEXT
);

CREATE TABLE IF NOT EXISTS vpn_ips (
    ip_address TEXT PRIMARY KEY,
    provider TEXT NOT NULL,
    country TEXT,
    city TEXT,
    hostname TEXT,
    server_name TEXT,
    added_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_vpn_ips_provider ON vpn_ips(provider);

CREATE TABLE IF NOT EXISTS vpn_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT
);
";

const UPSERT_PROVIDER: &str = "
INSERT INTO vpn_providers
    (name, display_name, website, server_count, ip_count, version, timestamp, last_updated)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(name) DO UPDATE SET
    display_name = excluded.display_name,
    website = excluded.website,
    server_count = excluded.server_count,
    ip_count = excluded.ip_count,
    version = excluded.version,
    timestamp = excluded.timestamp,
    last_updated = excluded.last_updated";

const UPSERT_IP: &str = "
INSERT INTO vpn_ips (ip_address, provider, country, city, hostname, server_name, added_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(ip_address) DO UPDATE SET
    provider = excluded.provider,
    country = excluded.country,
    city = excluded.city,
    hostname = excluded.hostname,
    server_name = excluded.server_name,
    added_at = excluded.added_at";

const SELECT_PROVIDER: &str = "
SELECT name, display_name, website, server_count, ip_count, version, timestamp, last_updated
FROM vpn_providers";

const SELECT_IP: &str = "
SELECT ip_address, provider, country, city, hostname, server_name, added_at
FROM vpn_ips";

/// SQLite store implementation
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("location", &self.location)
            .finish()
    }
}

impl SqliteStore {
    /// Open (or create) a database file
    ///
    /// # Parameters
    ///
    /// - `path`: Database file path; the parent directory must exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(store_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .map_err(store_err)?;

        debug!("Opened SQLite VPN store at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: path.display().to_string(),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location: ":memory:".to_string(),
        })
    }

    /// Where the database lives
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::store(format!("store task failed: {}", e)))?
        .map_err(store_err)
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::store(e.to_string())
}

fn fmt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn parse_ts(text: Option<String>) -> Option<DateTime<Utc>> {
    text.and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn count(value: Option<i64>) -> usize {
    usize::try_from(value.unwrap_or(0)).unwrap_or(0)
}

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<Provider> {
    Ok(Provider {
        name: row.get(0)?,
        display_name: row.get(1)?,
        website: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        server_count: count(row.get(3)?),
        ip_count: count(row.get(4)?),
        version: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        timestamp: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
        last_updated: parse_ts(row.get(7)?),
    })
}

fn ip_from_row(row: &Row<'_>) -> rusqlite::Result<IpRecord> {
    Ok(IpRecord {
        ip_address: row.get(0)?,
        provider: row.get(1)?,
        country: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        city: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        hostname: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        server_name: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        added_at: parse_ts(row.get(6)?),
    })
}

fn insert_provider(conn: &Connection, p: &Provider) -> rusqlite::Result<()> {
    conn.prepare_cached(UPSERT_PROVIDER)?.execute(params![
        p.name,
        p.display_name,
        p.website,
        p.server_count as i64,
        p.ip_count as i64,
        p.version,
        p.timestamp,
        fmt_ts(p.last_updated),
    ])?;
    Ok(())
}

fn insert_ip(conn: &Connection, r: &IpRecord) -> rusqlite::Result<()> {
    conn.prepare_cached(UPSERT_IP)?.execute(params![
        r.ip_address,
        r.provider,
        r.country,
        r.city,
        r.hostname,
        r.server_name,
        fmt_ts(r.added_at),
    ])?;
    Ok(())
}

#[async_trait]
impl VpnStore for SqliteStore {
    async fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch(SCHEMA)).await
    }

    async fn save_provider(&self, provider: &Provider) -> Result<()> {
        let provider = provider.clone();
        self.with_conn(move |conn| insert_provider(conn, &provider))
            .await
    }

    async fn get_provider(&self, name: &str) -> Result<Option<Provider>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("{} WHERE name = ?1", SELECT_PROVIDER),
                params![name],
                provider_from_row,
            )
            .optional()
        })
        .await
    }

    async fn list_providers(&self) -> Result<Vec<Provider>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} ORDER BY COALESCE(ip_count, 0) DESC, name",
                SELECT_PROVIDER
            ))?;
            let rows = stmt.query_map([], provider_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn save_ip(&self, record: &IpRecord) -> Result<()> {
        let Some(record) = canonical_record(record) else {
            return Ok(());
        };
        self.with_conn(move |conn| insert_ip(conn, &record)).await
    }

    async fn bulk_save_ips(&self, records: &[IpRecord]) -> Result<()> {
        let records = canonical_records(records);
        if records.is_empty() {
            return Ok(());
        }

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for record in &records {
                insert_ip(&tx, record)?;
            }
            tx.commit()
        })
        .await
    }

    async fn list_ips(&self) -> Result<Vec<IpRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} ORDER BY ip_address", SELECT_IP))?;
            let rows = stmt.query_map([], ip_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn is_vpn_ip(&self, ip: &str) -> Result<bool> {
        let key = storage_key(ip);
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT 1 FROM vpn_ips WHERE ip_address = ?1",
                params![key],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
        })
        .await
    }

    async fn get_vpn_info(&self, ip: &str) -> Result<LookupResult> {
        let key = storage_key(ip);
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("{} WHERE ip_address = ?1", SELECT_IP),
                    params![key],
                    ip_from_row,
                )
                .optional()
            })
            .await?;

        Ok(match row {
            Some(row) => LookupResult {
                is_vpn: true,
                provider_display: providers::display_name(&row.provider).to_string(),
                provider: row.provider,
                server_country: row.country,
                server_city: row.city,
                hostname: row.hostname,
                confidence: 100,
            },
            None => LookupResult::not_found(),
        })
    }

    async fn get_servers(&self, provider: &str) -> Result<Vec<Server>> {
        let provider = provider.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT COALESCE(hostname, ''), COALESCE(country, ''), COALESCE(city, ''),
                        group_concat(ip_address, ',')
                 FROM vpn_ips
                 WHERE provider = ?1
                 GROUP BY 1, 2, 3
                 ORDER BY 1, 2, 3",
            )?;
            let rows = stmt.query_map(params![provider], |row| {
                let joined: Option<String> = row.get(3)?;
                let mut ips: Vec<String> = joined
                    .unwrap_or_default()
                    .split(',')
                    .filter(|ip| !ip.is_empty())
                    .map(str::to_string)
                    .collect();
                ips.sort();

                Ok(Server {
                    provider: provider.clone(),
                    hostname: row.get(0)?,
                    country: row.get(1)?,
                    city: row.get(2)?,
                    ips,
                    ..Default::default()
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn get_stats(&self) -> Result<Stats> {
        let mut stats = self
            .with_conn(|conn| {
                let mut stats = conn.query_row(
                    "SELECT COUNT(DISTINCT provider),
                            COUNT(*),
                            COALESCE(SUM(CASE WHEN instr(ip_address, ':') > 0 THEN 0 ELSE 1 END), 0),
                            COALESCE(SUM(CASE WHEN instr(ip_address, ':') > 0 THEN 1 ELSE 0 END), 0),
                            COUNT(DISTINCT NULLIF(hostname, ''))
                     FROM vpn_ips",
                    [],
                    |row| {
                        Ok(Stats {
                            total_providers: count(row.get(0)?),
                            total_ips: count(row.get(1)?),
                            ipv4_count: count(row.get(2)?),
                            ipv6_count: count(row.get(3)?),
                            total_servers: count(row.get(4)?),
                            ..Default::default()
                        })
                    },
                )?;

                let last_updated: Option<String> = conn.query_row(
                    "SELECT MAX(last_updated) FROM vpn_providers",
                    [],
                    |row| row.get(0),
                )?;
                stats.last_updated = parse_ts(last_updated);
                Ok(stats)
            })
            .await?;

        stats.provider_stats = self.list_providers().await?;
        Ok(stats)
    }

    async fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM vpn_ips", [])?;
            tx.execute("DELETE FROM vpn_providers", [])?;
            tx.commit()
        })
        .await
    }

    async fn replace_all(&self, providers: &[Provider], ips: &[IpRecord]) -> Result<()> {
        let providers = providers.to_vec();
        let ips = canonical_records(ips);
        let (provider_count, ip_count) = (providers.len(), ips.len());
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM vpn_ips", [])?;
            tx.execute("DELETE FROM vpn_providers", [])?;
            for provider in &providers {
                insert_provider(&tx, provider)?;
            }
            for record in &ips {
                insert_ip(&tx, record)?;
            }
            tx.commit()
        })
        .await?;

        debug!(
            "Replaced SQLite VPN rows: {} provider(s), {} address(es)",
            provider_count, ip_count
        );
        Ok(())
    }

    async fn save_metadata(&self, rows: &[(String, String)]) -> Result<()> {
        let rows = rows.to_vec();
        let now = fmt_ts(Some(Utc::now()));
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for (key, value) in &rows {
                tx.prepare_cached(
                    "INSERT INTO vpn_metadata (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at",
                )?
                .execute(params![key, value, now])?;
            }
            tx.commit()
        })
        .await
    }

    async fn load_metadata(&self) -> Result<HashMap<String, String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM vpn_metadata")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
        .await
    }

    fn store_name(&self) -> &'static str {
        "sqlite"
    }
}
