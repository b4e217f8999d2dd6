// Environment configuration for vpninteld
//
// Every setting is optional; unset variables fall back to the library
// defaults. Values that are set but do not parse are errors, not defaults.

use anyhow::{Context, Result, anyhow, bail};
use std::env;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use vpnintel_core::{ServiceConfig, StoreConfig, UpdaterConfig, VpnIntelConfig};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub vpnintel: VpnIntelConfig,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// `from_env` is this with `std::env::var`; tests pass a map.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut service = ServiceConfig::default();
        let mut updater = UpdaterConfig::default();

        if let Some(enabled) = parse_var::<Flag, _>(&get, "VPNINTEL_ENABLED")? {
            service.enabled = enabled.0;
        }
        if let Some(size) = parse_var(&get, "VPNINTEL_CACHE_SIZE")? {
            service.cache_size = size;
        }
        service.data_file = get("VPNINTEL_DATA_FILE");

        if let Some(auto) = parse_var::<Flag, _>(&get, "VPNINTEL_AUTO_UPDATE")? {
            service.auto_update = auto.0;
        }
        updater.enabled = service.auto_update;

        if let Some(url) = get("VPNINTEL_SOURCE_URL") {
            updater.source_url = url;
        }
        if let Some(secs) = parse_var(&get, "VPNINTEL_UPDATE_INTERVAL_SECS")? {
            service.update_interval_secs = secs;
            updater.update_interval_secs = secs;
        }
        if let Some(secs) = parse_var(&get, "VPNINTEL_HTTP_TIMEOUT_SECS")? {
            updater.http_timeout_secs = secs;
        }
        if let Some(attempts) = parse_var(&get, "VPNINTEL_RETRY_ATTEMPTS")? {
            updater.retry_attempts = attempts;
        }
        if let Some(ms) = parse_var(&get, "VPNINTEL_RETRY_DELAY_MS")? {
            updater.retry_delay_ms = ms;
        }

        let store = match get("VPNINTEL_STORE_TYPE").as_deref().unwrap_or("memory") {
            "memory" => StoreConfig::Memory,
            "sqlite" => StoreConfig::Sqlite {
                path: get("VPNINTEL_STORE_PATH").ok_or_else(|| {
                    anyhow!(
                        "VPNINTEL_STORE_PATH is required when VPNINTEL_STORE_TYPE=sqlite. \
                        Set it via: export VPNINTEL_STORE_PATH=/var/lib/vpnintel/vpn.db"
                    )
                })?,
            },
            other => bail!(
                "VPNINTEL_STORE_TYPE '{}' is not supported. \
                Supported types: memory, sqlite",
                other
            ),
        };

        Ok(Self {
            vpnintel: VpnIntelConfig {
                service,
                updater,
                store,
            },
            log_level: get("VPNINTEL_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.vpnintel
            .validate()
            .context("invalid VPNINTEL_* settings")?;

        if let StoreConfig::Sqlite { path } = &self.vpnintel.store {
            if !cfg!(feature = "sqlite") {
                bail!("VPNINTEL_STORE_TYPE=sqlite requires the 'sqlite' feature");
            }

            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                bail!(
                    "VPNINTEL_STORE_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                    parent.display(),
                    parent.display()
                );
            }
        }

        if self.vpnintel.service.auto_update && !cfg!(feature = "http") {
            bail!("VPNINTEL_AUTO_UPDATE=true requires the 'http' feature");
        }

        let retries = self.vpnintel.updater.retry_attempts;
        if retries == 0 || retries > 10 {
            bail!(
                "VPNINTEL_RETRY_ATTEMPTS must be between 1 and 10. Got: {}",
                retries
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => bail!(
                "VPNINTEL_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}

/// Boolean accepting the usual spellings
struct Flag(bool);

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Flag(true)),
            "0" | "false" | "no" | "off" => Ok(Flag(false)),
            other => Err(format!("expected true/false, got '{}'", other)),
        }
    }
}

fn parse_var<T, F>(get: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = load(&[]).unwrap();
        assert!(config.vpnintel.service.enabled);
        assert!(!config.vpnintel.service.auto_update);
        assert!(!config.vpnintel.updater.enabled);
        assert_eq!(config.vpnintel.store, StoreConfig::Memory);
        assert_eq!(config.log_level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_full_configuration() {
        let dir = std::env::temp_dir();
        let db = dir.join("vpn.db").display().to_string();
        let config = load(&[
            ("VPNINTEL_ENABLED", "yes"),
            ("VPNINTEL_CACHE_SIZE", "500"),
            ("VPNINTEL_DATA_FILE", "/srv/servers.json"),
            ("VPNINTEL_AUTO_UPDATE", "true"),
            ("VPNINTEL_SOURCE_URL", "https://mirror.example.net/servers.json"),
            ("VPNINTEL_UPDATE_INTERVAL_SECS", "3600"),
            ("VPNINTEL_HTTP_TIMEOUT_SECS", "30"),
            ("VPNINTEL_RETRY_ATTEMPTS", "5"),
            ("VPNINTEL_RETRY_DELAY_MS", "250"),
            ("VPNINTEL_STORE_TYPE", "sqlite"),
            ("VPNINTEL_STORE_PATH", db.as_str()),
            ("VPNINTEL_LOG_LEVEL", "DEBUG"),
        ])
        .unwrap();

        let service = &config.vpnintel.service;
        assert_eq!(service.cache_size, 500);
        assert_eq!(service.data_file.as_deref(), Some("/srv/servers.json"));
        assert!(service.auto_update);
        assert_eq!(service.update_interval_secs, 3600);

        let updater = &config.vpnintel.updater;
        assert!(updater.enabled);
        assert_eq!(updater.source_url, "https://mirror.example.net/servers.json");
        assert_eq!(updater.update_interval_secs, 3600);
        assert_eq!(updater.http_timeout_secs, 30);
        assert_eq!(updater.retry_attempts, 5);
        assert_eq!(updater.retry_delay_ms, 250);

        assert_eq!(config.vpnintel.store, StoreConfig::Sqlite { path: db });
        config.validate().unwrap();
    }

    #[test]
    fn test_unparseable_values_are_errors() {
        let err = load(&[("VPNINTEL_RETRY_ATTEMPTS", "many")]).unwrap_err();
        assert!(err.to_string().contains("VPNINTEL_RETRY_ATTEMPTS"));

        let err = load(&[("VPNINTEL_AUTO_UPDATE", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("VPNINTEL_AUTO_UPDATE"));
    }

    #[test]
    fn test_store_type_rules() {
        let err = load(&[("VPNINTEL_STORE_TYPE", "sqlite")]).unwrap_err();
        assert!(err.to_string().contains("VPNINTEL_STORE_PATH"));

        let err = load(&[("VPNINTEL_STORE_TYPE", "redis")]).unwrap_err();
        assert!(err.to_string().contains("not supported"));

        let config = load(&[
            ("VPNINTEL_STORE_TYPE", "sqlite"),
            ("VPNINTEL_STORE_PATH", "/definitely/missing/dir/vpn.db"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = load(&[("VPNINTEL_LOG_LEVEL", "loud")]).unwrap();
        assert!(config.validate().is_err());

        let config = load(&[("VPNINTEL_RETRY_ATTEMPTS", "0")]).unwrap();
        assert!(config.validate().is_err());

        let config = load(&[("VPNINTEL_SOURCE_URL", "ftp://example.net/servers.json")]).unwrap();
        assert!(config.validate().is_err());

        let config = load(&[("VPNINTEL_DATA_FILE", "")]).unwrap();
        assert!(config.validate().is_err());
    }
}
