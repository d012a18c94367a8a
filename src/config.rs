//! Process configuration read from the environment.

use std::time::Duration;
use thiserror::Error;

use crate::remote::RemoteConfig;
use crate::storage::StorageConfig;
use crate::sync::SyncConfig;

/// Errors that can occur while reading configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{0} is set but {1} is missing")]
    Incomplete(&'static str, &'static str),
}

/// Everything the agent needs to start
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub storage: StorageConfig,
    /// `None` runs the agent in local-only mode
    pub remote: Option<RemoteConfig>,
    pub sync: SyncConfig,
    pub base_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            storage: StorageConfig::default(),
            remote: None,
            sync: SyncConfig::default(),
            base_backoff_ms: 150,
            jitter_ms: 400,
        }
    }
}

impl AppConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(port) = var("PORT") {
            config.port = parse("PORT", &port)?;
        }
        if let Some(path) = var("STORAGE_PATH") {
            config.storage = StorageConfig::new(path);
        }

        config.remote = match (var("SUPABASE_URL"), var("SUPABASE_ANON_KEY")) {
            (Some(url), Some(key)) => {
                let mut remote = RemoteConfig::new(url, key);
                if let Some(table) = var("REMOTE_TABLE") {
                    remote = remote.with_table(table);
                }
                if let Some(key) = var("REMOTE_DOCUMENT_KEY") {
                    remote = remote.with_document_key(key);
                }
                Some(remote)
            }
            (Some(_), None) => {
                return Err(ConfigError::Incomplete("SUPABASE_URL", "SUPABASE_ANON_KEY"))
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete("SUPABASE_ANON_KEY", "SUPABASE_URL"))
            }
            (None, None) => None,
        };

        if let Some(secs) = var("SYNC_INTERVAL_SECS") {
            let secs: u64 = parse("SYNC_INTERVAL_SECS", &secs)?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "SYNC_INTERVAL_SECS",
                    value: secs.to_string(),
                });
            }
            config.sync = config.sync.with_interval(Duration::from_secs(secs));
        }
        if let Some(client_id) = var("CLIENT_ID") {
            config.sync = config.sync.with_client_id(client_id);
        }
        if let Some(ms) = var("RETRY_BASE_BACKOFF_MS") {
            config.base_backoff_ms = parse("RETRY_BASE_BACKOFF_MS", &ms)?;
        }
        if let Some(ms) = var("RETRY_JITTER_MS") {
            config.jitter_ms = parse("RETRY_JITTER_MS", &ms)?;
        }

        Ok(config)
    }

    pub fn is_local_only(&self) -> bool {
        self.remote.is_none()
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}
