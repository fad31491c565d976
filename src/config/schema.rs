use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Admin endpoint (metrics, suspend, status)
    #[serde(default)]
    pub server: ServerConfig,
    /// Health checker configuration
    #[serde(default)]
    pub health: HealthCheckConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
}

fn default_admin_addr() -> String {
    "127.0.0.1:9466".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            admin_addr: default_admin_addr(),
        }
    }
}

// ============================================================================
// Health Check Configuration
// ============================================================================

/// Which health checker implementation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Records kept in this process only
    #[default]
    Memory,
    /// Records kept in a Redis-compatible store
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
        }
    }
}

/// Health checker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: BackendKind,
    /// Identity of this node, written into the known-servers set
    #[serde(default = "default_local_host")]
    pub local_host: String,
    /// Prefix for per-instance record keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Set holding the identities of every node sharing the store
    #[serde(default = "default_servers_key")]
    pub servers_key: String,
    /// Flat store option table, see [`StoreConfig`]
    #[serde(default)]
    pub options: toml::Table,
}

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

fn default_key_prefix() -> String {
    "vigil:hb:".to_string()
}

fn default_servers_key() -> String {
    "vigil:servers".to_string()
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            local_host: default_local_host(),
            key_prefix: default_key_prefix(),
            servers_key: default_servers_key(),
            options: toml::Table::new(),
        }
    }
}

impl HealthCheckConfig {
    /// Decode and validate the store options
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        StoreConfig::from_options(&self.options)
    }
}

// ============================================================================
// Remote Store Configuration
// ============================================================================

/// Options for one remote store task pool
///
/// Decoded from a flat key/value table so it can be embedded in a larger
/// plugin document. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store address (host:port)
    #[serde(default)]
    pub address: String,
    /// ACL username (empty for password-only AUTH)
    #[serde(default)]
    pub username: String,
    /// AUTH password (empty disables AUTH)
    #[serde(default)]
    pub password: String,
    /// Maximum open connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Connections opened eagerly at startup
    #[serde(default = "default_min_idle_conns")]
    pub min_idle_conns: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Wait for a free connection before failing
    #[serde(default = "default_pool_timeout_ms")]
    pub pool_timeout_ms: u64,
    /// Recycle connections older than this
    #[serde(default = "default_max_conn_age_ms")]
    pub max_conn_age_ms: u64,
    /// Close connections idle longer than this
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Number of independent pipeline partitions
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Pending tasks that trigger a flush
    #[serde(default = "default_min_batch_count")]
    pub min_batch_count: usize,
    /// Flush period for partial batches
    #[serde(default = "default_wait_time_ms")]
    pub wait_time_ms: u64,
    /// Retries for write operations (attempts = max_retry + 1)
    #[serde(default = "default_max_retry")]
    pub max_retry: usize,
    /// Read and write records in the legacy format
    #[serde(default)]
    pub compatible: bool,
    /// Connect over TLS
    #[serde(default)]
    pub tls: bool,
}

fn default_pool_size() -> usize {
    32
}

fn default_min_idle_conns() -> usize {
    4
}

fn default_connect_timeout_ms() -> u64 {
    500
}

fn default_io_timeout_ms() -> u64 {
    500
}

fn default_pool_timeout_ms() -> u64 {
    1000
}

fn default_max_conn_age_ms() -> u64 {
    3_600_000 // 1 hour
}

fn default_idle_timeout_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_concurrency() -> usize {
    16
}

fn default_min_batch_count() -> usize {
    10
}

fn default_wait_time_ms() -> u64 {
    50
}

fn default_max_retry() -> usize {
    2
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            username: String::new(),
            password: String::new(),
            pool_size: default_pool_size(),
            min_idle_conns: default_min_idle_conns(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_io_timeout_ms(),
            write_timeout_ms: default_io_timeout_ms(),
            pool_timeout_ms: default_pool_timeout_ms(),
            max_conn_age_ms: default_max_conn_age_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            concurrency: default_concurrency(),
            min_batch_count: default_min_batch_count(),
            wait_time_ms: default_wait_time_ms(),
            max_retry: default_max_retry(),
            compatible: false,
            tls: false,
        }
    }
}

impl StoreConfig {
    /// Default options pointed at `address`
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Decode from a flat option table and validate
    pub fn from_options(options: &toml::Table) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::Value::Table(options.clone()).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pool cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("store address is empty".into()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.min_batch_count == 0 {
            return Err(ConfigError::Invalid("min_batch_count must be at least 1".into()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.wait_time_ms == 0 {
            return Err(ConfigError::Invalid("wait_time_ms must be at least 1".into()));
        }
        Ok(())
    }

    /// Host part of the address, used as the TLS server name
    ///
    /// Brackets around an IPv6 literal (`[::1]:6379`) are stripped.
    pub fn host(&self) -> &str {
        let host = self
            .address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.address);
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    pub fn max_conn_age(&self) -> Duration {
        Duration::from_millis(self.max_conn_age_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }
}
