//! Gateway configuration
//!
//! Loaded from an optional TOML file, then environment overrides, then CLI
//! flags. Every tunable of the engine has its default here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use xorbhub_core::{
    DEFAULT_BLOCK_SIZE, DEFAULT_XORB_TARGET_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE,
    RECONSTRUCTION_WINDOW_SIZE, SHARD_COMPACTION_THRESHOLD,
};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub chunking: ChunkingSettings,

    #[serde(default)]
    pub compaction: CompactionSettings,

    #[serde(default)]
    pub shards: ShardSettings,

    #[serde(default)]
    pub reconstruction: ReconstructionSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DATABASE_URL`, `REDIS_URL` and `XORBHUB_*` overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.cache.redis_url = Some(url);
        }
        if let Ok(addr) = std::env::var("XORBHUB_HTTP_ADDR") {
            self.server.http_addr = addr;
        }
        if let Ok(url) = std::env::var("XORBHUB_PUBLIC_URL") {
            self.server.public_base_url = url;
        }
        if let Ok(dir) = std::env::var("XORBHUB_STORAGE_DIR") {
            self.storage.path = Some(PathBuf::from(dir));
        }
        if let Ok(secret) = std::env::var("XORBHUB_SIGNING_SECRET") {
            self.storage.signing_secret = Some(secret);
        }
        if let Ok(dir) = std::env::var("XORBHUB_DISK_CACHE_DIR") {
            self.cache.disk_dir = Some(PathBuf::from(dir));
        }
        if let Some(size) = env_parse::<usize>("XORBHUB_BLOCK_SIZE") {
            self.chunking.block_size = size;
        }
        if let Some(size) = env_parse::<u64>("XORBHUB_XORB_TARGET_SIZE") {
            self.compaction.xorb_target_size = size;
        }
        if let Ok(v) = std::env::var("XORBHUB_ALWAYS_FLUSH_REMAINDER") {
            self.compaction.always_flush_remainder = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(level) = std::env::var("XORBHUB_LOG_LEVEL") {
            self.logging.level = level;
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.chunking.block_size) {
            return Err(ConfigError::ValidationError(format!(
                "block_size {} outside [{}, {}]",
                self.chunking.block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            )));
        }
        if self.compaction.xorb_target_size == 0 {
            return Err(ConfigError::ValidationError(
                "xorb_target_size cannot be 0".to_string(),
            ));
        }
        if self.compaction.batch_limit == 0 {
            return Err(ConfigError::ValidationError(
                "compaction batch_limit cannot be 0".to_string(),
            ));
        }
        // Clients address ranges with u32 offsets
        if self.reconstruction.window_size == 0 || self.reconstruction.window_size >= u32::MAX as u64 {
            return Err(ConfigError::ValidationError(format!(
                "reconstruction window_size {} must be in (0, 4 GiB)",
                self.reconstruction.window_size
            )));
        }
        if self.server.max_body_bytes < self.chunking.block_size {
            return Err(ConfigError::ValidationError(format!(
                "max_body_bytes {} is smaller than block_size {}",
                self.server.max_body_bytes, self.chunking.block_size
            )));
        }
        let intervals = [
            ("chunking.interval_secs", self.chunking.interval_secs),
            ("compaction.interval_secs", self.compaction.interval_secs),
            ("shards.generate_interval_secs", self.shards.generate_interval_secs),
            ("shards.compact_interval_secs", self.shards.compact_interval_secs),
            ("cache.cleanup_interval_secs", self.cache.cleanup_interval_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::ValidationError(format!("{} cannot be 0", name)));
        }
        if let Some(secret) = &self.storage.signing_secret {
            if secret.is_empty() {
                return Err(ConfigError::ValidationError(
                    "signing_secret cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Base URL presigned object URLs are rooted at
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub cors_permissive: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            public_base_url: default_public_base_url(),
            max_body_bytes: default_max_body_bytes(),
            cors_permissive: false,
        }
    }
}

/// Registry database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL URL; unset selects the in-memory registry
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Fast tier and local disk cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Redis URL; unset disables the Redis tier
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Use the in-process cache when Redis is not configured
    #[serde(default = "default_true")]
    pub memory_fallback: bool,

    #[serde(default = "default_cache_prefix")]
    pub prefix: String,

    /// Upper bound for any single cache call
    #[serde(default = "default_cache_timeout_ms")]
    pub op_timeout_ms: u64,

    /// Hot content TTL
    #[serde(default = "default_hot_ttl_secs")]
    pub hot_ttl_secs: u64,

    /// Byte budget of the in-process hot content tier
    #[serde(default = "default_memory_max_bytes")]
    pub memory_max_bytes: u64,

    /// Local disk cache root; unset disables the disk tier
    #[serde(default)]
    pub disk_dir: Option<PathBuf>,

    #[serde(default = "default_disk_max_bytes")]
    pub disk_max_bytes: u64,

    #[serde(default = "default_slow_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            memory_fallback: true,
            prefix: default_cache_prefix(),
            op_timeout_ms: default_cache_timeout_ms(),
            hot_ttl_secs: default_hot_ttl_secs(),
            memory_max_bytes: default_memory_max_bytes(),
            disk_dir: None,
            disk_max_bytes: default_disk_max_bytes(),
            cleanup_interval_secs: default_slow_interval_secs(),
        }
    }
}

impl CacheSettings {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn hot_ttl(&self) -> Duration {
        Duration::from_secs(self.hot_ttl_secs)
    }
}

/// Durable object store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Local backend root; unset selects the in-memory store
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Per-call timeout for the object store
    #[serde(default = "default_store_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Passphrase for presigned URLs; unset generates an ephemeral key
    #[serde(default)]
    pub signing_secret: Option<String>,

    /// Expiry of block and shard redirect URLs
    #[serde(default = "default_redirect_ttl_secs")]
    pub redirect_ttl_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: None,
            call_timeout_secs: default_store_timeout_secs(),
            signing_secret: None,
            redirect_ttl_secs: default_redirect_ttl_secs(),
        }
    }
}

impl StorageSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn redirect_ttl(&self) -> Duration {
        Duration::from_secs(self.redirect_ttl_secs)
    }
}

/// Chunking sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSettings {
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    #[serde(default = "default_files_per_sweep")]
    pub files_per_sweep: usize,

    #[serde(default = "default_fast_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            files_per_sweep: default_files_per_sweep(),
            interval_secs: default_fast_interval_secs(),
        }
    }
}

/// Xorb compaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionSettings {
    #[serde(default = "default_xorb_target_size")]
    pub xorb_target_size: u64,

    /// Unplaced blocks considered per sweep
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Seal the below-target remainder even when a full xorb was sealed
    #[serde(default)]
    pub always_flush_remainder: bool,

    #[serde(default = "default_slow_interval_secs")]
    pub interval_secs: u64,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            xorb_target_size: default_xorb_target_size(),
            batch_limit: default_batch_limit(),
            always_flush_remainder: false,
            interval_secs: default_slow_interval_secs(),
        }
    }
}

/// Shard generation and merging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardSettings {
    /// Shards below this size are merged
    #[serde(default = "default_shard_threshold")]
    pub compaction_threshold: u64,

    #[serde(default = "default_slow_interval_secs")]
    pub generate_interval_secs: u64,

    #[serde(default = "default_slow_interval_secs")]
    pub compact_interval_secs: u64,
}

impl Default for ShardSettings {
    fn default() -> Self {
        Self {
            compaction_threshold: default_shard_threshold(),
            generate_interval_secs: default_slow_interval_secs(),
            compact_interval_secs: default_slow_interval_secs(),
        }
    }
}

/// Reconstruction responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionSettings {
    /// Window cap for un-chunked files
    #[serde(default = "default_window_size")]
    pub window_size: u64,

    /// Expiry of reconstruction URLs
    #[serde(default = "default_reconstruction_ttl_secs")]
    pub url_ttl_secs: u64,
}

impl Default for ReconstructionSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            url_ttl_secs: default_reconstruction_ttl_secs(),
        }
    }
}

impl ReconstructionSettings {
    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_secs)
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_max_connections() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_cache_prefix() -> String {
    "xet".to_string()
}

fn default_cache_timeout_ms() -> u64 {
    500
}

fn default_hot_ttl_secs() -> u64 {
    3600
}

fn default_memory_max_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_disk_max_bytes() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_store_timeout_secs() -> u64 {
    30
}

fn default_redirect_ttl_secs() -> u64 {
    3600
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_files_per_sweep() -> usize {
    10
}

fn default_fast_interval_secs() -> u64 {
    60
}

fn default_slow_interval_secs() -> u64 {
    600
}

fn default_xorb_target_size() -> u64 {
    DEFAULT_XORB_TARGET_SIZE
}

fn default_batch_limit() -> usize {
    1000
}

fn default_shard_threshold() -> u64 {
    SHARD_COMPACTION_THRESHOLD
}

fn default_window_size() -> u64 {
    RECONSTRUCTION_WINDOW_SIZE
}

fn default_reconstruction_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_engine_constants() {
        let config = GatewayConfig::default();
        assert_eq!(config.chunking.block_size, 4 * 1024 * 1024);
        assert_eq!(config.compaction.xorb_target_size, 100 * 1024 * 1024);
        assert_eq!(config.compaction.batch_limit, 1000);
        assert!(!config.compaction.always_flush_remainder);
        assert_eq!(config.shards.compaction_threshold, 1024 * 1024);
        assert_eq!(config.reconstruction.window_size, 64 * 1024 * 1024);
        assert_eq!(config.reconstruction.url_ttl(), Duration::from_secs(604_800));
        assert_eq!(config.chunking.interval_secs, 60);
        assert_eq!(config.compaction.interval_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
http_addr = "127.0.0.1:9000"

[compaction]
xorb_target_size = 1048576
always_flush_remainder = true
"#
        )
        .unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.http_addr, "127.0.0.1:9000");
        assert_eq!(config.compaction.xorb_target_size, 1024 * 1024);
        assert!(config.compaction.always_flush_remainder);
        // untouched sections keep defaults
        assert_eq!(config.chunking.files_per_sweep, 10);
        assert_eq!(config.cache.prefix, "xet");
    }

    #[test]
    fn test_validation_rejects_bad_sizes() {
        let mut config = GatewayConfig::default();
        config.chunking.block_size = 10;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = GatewayConfig::default();
        config.reconstruction.window_size = 5 * 1024 * 1024 * 1024;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.server.max_body_bytes = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = GatewayConfig::from_file(Path::new("/nonexistent/xorbhub.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }
}
