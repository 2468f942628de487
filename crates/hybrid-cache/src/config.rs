//! Hybrid cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Codec;

/// Configuration for the hybrid cache provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridCacheConfig {
    /// TTL applied when a caller does not supply one (seconds)
    #[serde(default = "default_expiration_secs")]
    pub default_expiration_secs: u64,

    /// Upper bound for local (L1) entry lifetime (seconds)
    #[serde(default = "default_local_expiration_secs")]
    pub local_expiration_secs: u64,

    /// Lock wait/lease timeout when a policy does not supply one (milliseconds)
    #[serde(default = "default_lock_timeout_ms")]
    pub default_lock_timeout_ms: u64,

    /// Whether policies built from defaults take the distributed lock
    #[serde(default = "default_use_distributed_lock")]
    pub use_distributed_lock: bool,

    /// Local (L1) cache max entries
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: u64,

    /// Prefix applied to every shared-tier key, lock key and pub/sub channel
    #[serde(default)]
    pub instance_name: String,

    /// Payload encoding
    #[serde(default)]
    pub serializer: Codec,

    /// Publish removals so other instances drop their local copies
    #[serde(default)]
    pub broadcast_invalidations: bool,

    /// Shared tier / lock service
    #[serde(default)]
    pub redis: RedisConfig,
}

fn default_expiration_secs() -> u64 {
    3600 // 1 hour
}

fn default_local_expiration_secs() -> u64 {
    120
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_use_distributed_lock() -> bool {
    true
}

fn default_local_max_entries() -> u64 {
    10_000
}

impl Default for HybridCacheConfig {
    fn default() -> Self {
        Self {
            default_expiration_secs: default_expiration_secs(),
            local_expiration_secs: default_local_expiration_secs(),
            default_lock_timeout_ms: default_lock_timeout_ms(),
            use_distributed_lock: default_use_distributed_lock(),
            local_max_entries: default_local_max_entries(),
            instance_name: String::new(),
            serializer: Codec::default(),
            broadcast_invalidations: false,
            redis: RedisConfig::default(),
        }
    }
}

impl HybridCacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_lock_timeout_ms == 0 {
            return Err("default_lock_timeout_ms must be > 0".into());
        }
        if self.local_max_entries == 0 {
            return Err("local_max_entries must be > 0".into());
        }
        if self.redis.is_enabled() && self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.broadcast_invalidations && !self.redis.is_enabled() {
            return Err("broadcast_invalidations requires redis.connection_string".into());
        }
        Ok(())
    }

    pub fn default_expiration(&self) -> Duration {
        Duration::from_secs(self.default_expiration_secs)
    }

    pub fn local_expiration(&self) -> Duration {
        Duration::from_secs(self.local_expiration_secs)
    }

    pub fn default_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.default_lock_timeout_ms)
    }
}

/// Redis connection configuration.
///
/// An empty connection string keeps both the shared tier and the lock
/// service inside the current process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub connection_string: Option<String>,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5_000
}

impl RedisConfig {
    pub fn is_enabled(&self) -> bool {
        self.url().is_some()
    }

    /// Connection string, if one is configured and non-blank
    pub fn url(&self) -> Option<&str> {
        self.connection_string
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

pub mod loader {
    use super::HybridCacheConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file looked up in the working directory
    pub const DEFAULT_CONFIG_FILE: &str = "hybrid-cache.toml";

    pub fn load_config(path: Option<&str>) -> Result<HybridCacheConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", pathbuf.display()));
        }
        // Environment variable overrides, e.g., HYBRID_CACHE__REDIS__CONNECTION_STRING=redis://...
        builder = builder.add_source(
            Environment::with_prefix("HYBRID_CACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: HybridCacheConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
