use anyhow::{anyhow, bail, Context};
use log::{debug, info};
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::db::{memory::MemoryStore, redis_backend::RedisStore, DataStore};
use crate::subscriptions::Subscriptions;
use common::docker::is_running_in_docker;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Memory,
    Redis { url: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub host: IpAddr,
    pub port: u16,
    pub backend: StorageBackend,
    pub max_body_bytes: u64,
}

pub struct AppState {
    pub configuration: Configuration,
    pub db: Arc<dyn DataStore>,
    pub subscriptions: Subscriptions,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            host: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            backend: StorageBackend::Memory,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Configuration {
    /// Loads the configuration from the process environment, reading a `.env`
    /// file first when running outside a container.
    pub fn from_env() -> anyhow::Result<Self> {
        if !is_running_in_docker() {
            if let Err(e) = dotenv::dotenv() {
                debug!("No .env file loaded: {}", e);
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("STORE_HOST")
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
            .parse::<IpAddr>()
            .context("STORE_HOST must be an IP address")?;

        let port = match lookup("STORE_PORT") {
            Some(port) => port.parse::<u16>().context("STORE_PORT must be a port number")?,
            None => DEFAULT_PORT,
        };

        let max_body_bytes = match lookup("STORE_MAX_BODY_BYTES") {
            Some(limit) => limit
                .parse::<u64>()
                .context("STORE_MAX_BODY_BYTES must be a byte count")?,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        let redis_url = lookup("REDIS_URL").filter(|url| !url.is_empty());
        let backend = match lookup("STORE_BACKEND").as_deref() {
            Some("memory") => StorageBackend::Memory,
            Some("redis") => StorageBackend::Redis {
                url: redis_url.ok_or_else(|| anyhow!("REDIS_URL must be set for the redis backend"))?,
            },
            Some(other) => bail!("STORE_BACKEND must be `memory` or `redis`, got `{}`", other),
            None => match redis_url {
                Some(url) => StorageBackend::Redis { url },
                None => StorageBackend::Memory,
            },
        };

        let config = Configuration {
            host,
            port,
            backend,
            max_body_bytes,
        };

        debug!(
            "Loaded configuration:
            Host: {},
            Port: {},
            Backend: {:?},
            MaxBodyBytes: {}",
            config.host,
            config.port,
            config.backend,
            config.max_body_bytes,
        );

        Ok(config)
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl AppState {
    pub fn new(configuration: Configuration, db: Arc<dyn DataStore>) -> Self {
        AppState {
            configuration,
            db,
            subscriptions: Subscriptions::default(),
        }
    }
}

// Builds the storage backend named by the configuration and wraps it in the shared state.
pub fn initialize_state(configuration: Configuration) -> anyhow::Result<AppState> {
    let db: Arc<dyn DataStore> = match &configuration.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage, data will not survive a restart");
            Arc::new(MemoryStore::default())
        }
        StorageBackend::Redis { url } => {
            let store = RedisStore::connect(url)
                .with_context(|| format!("Failed to connect to Redis at {}", url))?;
            info!("Connected to Redis storage at {}", url);
            Arc::new(store)
        }
    };

    Ok(AppState::new(configuration, db))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Configuration::default());
        assert_eq!(config.bind_address().to_string(), "0.0.0.0:8000");
    }

    #[test]
    fn test_redis_url_selects_redis_backend() {
        let config =
            Configuration::from_lookup(lookup_from(&[("REDIS_URL", "redis://cache:6379")])).unwrap();
        assert_eq!(
            config.backend,
            StorageBackend::Redis {
                url: "redis://cache:6379".to_string()
            }
        );
    }

    #[test]
    fn test_explicit_memory_backend_ignores_redis_url() {
        let config = Configuration::from_lookup(lookup_from(&[
            ("REDIS_URL", "redis://cache:6379"),
            ("STORE_BACKEND", "memory"),
        ]))
        .unwrap();
        assert_eq!(config.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let err = Configuration::from_lookup(lookup_from(&[("STORE_BACKEND", "redis")])).unwrap_err();
        assert!(err.to_string().contains("REDIS_URL"));
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = Configuration::from_lookup(lookup_from(&[("STORE_PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("STORE_PORT"));

        let err = Configuration::from_lookup(lookup_from(&[("STORE_HOST", "localhost")])).unwrap_err();
        assert!(err.to_string().contains("STORE_HOST"));

        let err = Configuration::from_lookup(lookup_from(&[("STORE_BACKEND", "postgres")])).unwrap_err();
        assert!(err.to_string().contains("STORE_BACKEND"));
    }

    #[test]
    fn test_custom_bind_and_limit() {
        let config = Configuration::from_lookup(lookup_from(&[
            ("STORE_HOST", "127.0.0.1"),
            ("STORE_PORT", "9100"),
            ("STORE_MAX_BODY_BYTES", "2048"),
        ]))
        .unwrap();
        assert_eq!(config.bind_address().to_string(), "127.0.0.1:9100");
        assert_eq!(config.max_body_bytes, 2048);
    }

    #[test]
    fn test_initialize_memory_state() {
        let state = initialize_state(Configuration::default()).unwrap();
        assert!(state.db.list().unwrap().is_empty());
    }
}
