//! monsrv configuration
//!
//! Layered figment loading: compiled defaults, then an optional YAML file,
//! then `MONSRV_`-prefixed environment variables (nested keys split on `__`,
//! e.g. `MONSRV_ENGINE__EVALUATION_TIMEOUT_MS=2000`).

use crate::error::{MonsrvError, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Durable store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Working-set memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Write coalescer configuration
    #[serde(default)]
    pub coalescer: CoalescerConfig,

    /// Rule engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Live fan-out configuration
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// Daily rollup configuration
    #[serde(default)]
    pub rollup: RollupConfig,

    /// Shutdown configuration
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log level filter (tracing EnvFilter syntax)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional log file path (daily rotation); console only when unset
    #[serde(default)]
    pub log_file: Option<String>,
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Working-set memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Readings retained per channel
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Bus subscription pattern
    #[serde(default = "default_topic_pattern")]
    pub topic_pattern: String,

    /// Bound of the update queue feeding the rule engine
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Sentinel payloads discarded before decoding (case-insensitive)
    #[serde(default)]
    pub reject_sentinels: Vec<String>,
}

/// Write coalescer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoalescerConfig {
    /// Debounce interval between flushes in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Pending readings before a flush is forced
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

/// Rule engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-rule evaluation timeout in milliseconds
    #[serde(default = "default_evaluation_timeout_ms")]
    pub evaluation_timeout_ms: u64,

    /// Repeat interval for active SERIOUS rules in seconds
    #[serde(default = "default_serious_repeat_secs")]
    pub serious_repeat_secs: u64,
}

/// Live fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Bound of each subscriber's frame queue
    #[serde(default = "default_client_queue_capacity")]
    pub client_queue_capacity: usize,
}

/// Daily rollup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupConfig {
    /// UTC hour at which the daily job runs (0-23)
    #[serde(default)]
    pub hour_utc: u32,
}

/// Shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Hard bound on graceful shutdown in seconds
    #[serde(default = "default_hard_timeout_secs")]
    pub hard_timeout_secs: u64,
}

impl Config {
    /// Load configuration
    ///
    /// `path` overrides the file lookup; otherwise the first existing file of
    /// `config/monsrv.yaml` and `/etc/warden/monsrv.yaml` is used. A missing
    /// file is not an error; defaults and environment still apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let yaml_path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(MonsrvError::ConfigError(format!(
                        "config file not found: {}",
                        p.display()
                    )));
                }
                Some(p.to_path_buf())
            }
            None => ["config/monsrv.yaml", "/etc/warden/monsrv.yaml"]
                .iter()
                .map(Path::new)
                .find(|p| p.exists())
                .map(Path::to_path_buf),
        };

        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(p) = &yaml_path {
            figment = figment.merge(Yaml::file(p));
        }
        let config: Config = figment
            .merge(Env::prefixed("MONSRV_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration completeness
    pub fn validate(&self) -> Result<()> {
        if self.service.name.is_empty() {
            return Err(MonsrvError::ConfigError(
                "service name cannot be empty".to_string(),
            ));
        }
        if self.store.path.is_empty() {
            return Err(MonsrvError::ConfigError(
                "store path cannot be empty".to_string(),
            ));
        }
        if self.store.max_connections == 0 {
            return Err(MonsrvError::ConfigError(
                "store max_connections must be positive".to_string(),
            ));
        }
        if self.memory.window_size == 0 {
            return Err(MonsrvError::ConfigError(
                "memory window_size must be positive".to_string(),
            ));
        }
        if self.ingest.queue_capacity == 0 {
            return Err(MonsrvError::ConfigError(
                "ingest queue_capacity must be positive".to_string(),
            ));
        }
        if self.coalescer.debounce_ms == 0 {
            return Err(MonsrvError::ConfigError(
                "coalescer debounce_ms must be positive".to_string(),
            ));
        }
        if self.coalescer.max_pending == 0 {
            return Err(MonsrvError::ConfigError(
                "coalescer max_pending must be positive".to_string(),
            ));
        }
        if self.engine.evaluation_timeout_ms == 0 {
            return Err(MonsrvError::ConfigError(
                "engine evaluation_timeout_ms must be positive".to_string(),
            ));
        }
        if self.engine.serious_repeat_secs == 0 {
            return Err(MonsrvError::ConfigError(
                "engine serious_repeat_secs must be positive".to_string(),
            ));
        }
        if self.fanout.client_queue_capacity == 0 {
            return Err(MonsrvError::ConfigError(
                "fanout client_queue_capacity must be positive".to_string(),
            ));
        }
        if self.rollup.hour_utc > 23 {
            return Err(MonsrvError::ConfigError(
                "rollup hour_utc must be 0-23".to_string(),
            ));
        }
        if self.shutdown.hard_timeout_secs == 0 {
            return Err(MonsrvError::ConfigError(
                "shutdown hard_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl CoalescerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl EngineConfig {
    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluation_timeout_ms)
    }

    pub fn serious_repeat(&self) -> Duration {
        Duration::from_secs(self.serious_repeat_secs)
    }
}

impl ShutdownConfig {
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(self.hard_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service: ServiceConfig::default(),
            store: StoreConfig::default(),
            memory: MemoryConfig::default(),
            ingest: IngestConfig::default(),
            coalescer: CoalescerConfig::default(),
            engine: EngineConfig::default(),
            fanout: FanoutConfig::default(),
            rollup: RollupConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            name: default_service_name(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: default_store_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            window_size: default_window_size(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            topic_pattern: default_topic_pattern(),
            queue_capacity: default_queue_capacity(),
            reject_sentinels: Vec::new(),
        }
    }
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        CoalescerConfig {
            debounce_ms: default_debounce_ms(),
            max_pending: default_max_pending(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            evaluation_timeout_ms: default_evaluation_timeout_ms(),
            serious_repeat_secs: default_serious_repeat_secs(),
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        FanoutConfig {
            client_queue_capacity: default_client_queue_capacity(),
        }
    }
}

impl Default for RollupConfig {
    fn default() -> Self {
        RollupConfig { hour_utc: 0 }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            hard_timeout_secs: default_hard_timeout_secs(),
        }
    }
}

// Default value functions
fn default_service_name() -> String {
    "monsrv".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_store_path() -> String {
    "data/warden.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_window_size() -> usize {
    5
}

fn default_topic_pattern() -> String {
    "#".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_max_pending() -> usize {
    10_000
}

fn default_evaluation_timeout_ms() -> u64 {
    5000
}

fn default_serious_repeat_secs() -> u64 {
    3
}

fn default_client_queue_capacity() -> usize {
    64
}

fn default_hard_timeout_secs() -> u64 {
    10
}
