use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
};

/// Which storage backend serves telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub storage: StorageBackend,
    pub database_url: Option<String>,
    pub max_pool_size: u32,
    pub apply_schema: bool,
    pub pg_ssl_root_cert: Option<String>,
    pub pg_ssl_cert: Option<String>,
    pub pg_ssl_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    analytics_listen_addr: Option<String>,
    #[serde(default)]
    analytics_listen_host: Option<String>,
    #[serde(default)]
    analytics_listen_port: Option<u16>,
    #[serde(default)]
    analytics_storage: StorageBackend,
    #[serde(default)]
    analytics_database_url: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    analytics_max_pool_size: u32,
    #[serde(default = "default_apply_schema")]
    analytics_apply_schema: bool,
}

const fn default_pool_size() -> u32 {
    10
}

const fn default_apply_schema() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse ANALYTICS_* environment variables")?;

        let listen_addr = resolve_addr(
            raw.analytics_listen_addr,
            raw.analytics_listen_host,
            raw.analytics_listen_port,
        )?;

        let database_url = raw.analytics_database_url.or(raw.database_url);
        if raw.analytics_storage == StorageBackend::Postgres && database_url.is_none() {
            anyhow::bail!("ANALYTICS_DATABASE_URL or DATABASE_URL must be set");
        }

        let config = Self {
            listen_addr,
            storage: raw.analytics_storage,
            database_url,
            max_pool_size: raw.analytics_max_pool_size.max(1),
            apply_schema: raw.analytics_apply_schema,
            pg_ssl_root_cert: env::var("PGSSLROOTCERT").ok(),
            pg_ssl_cert: env::var("PGSSLCERT").ok(),
            pg_ssl_key: env::var("PGSSLKEY").ok(),
        };
        config.validate_tls()?;
        Ok(config)
    }

    /// Configuration for the in-process backend, used by local runs and tests.
    pub fn in_memory(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            storage: StorageBackend::Memory,
            database_url: None,
            max_pool_size: 1,
            apply_schema: false,
            pg_ssl_root_cert: None,
            pg_ssl_cert: None,
            pg_ssl_key: None,
        }
    }

    fn validate_tls(&self) -> Result<()> {
        match (&self.pg_ssl_cert, &self.pg_ssl_key) {
            (Some(_), None) | (None, Some(_)) => {
                anyhow::bail!("PGSSLCERT and PGSSLKEY must both be set (or neither)")
            }
            _ => Ok(()),
        }
    }
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid ANALYTICS_LISTEN_ADDR value")?
            .next()
            .context("ANALYTICS_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(8490);
    let combined = format!("{}:{}", host, port);
    combined
        .to_socket_addrs()
        .context("invalid analytics listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}
