use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Scratch space for spooled uploads and render output.
    pub work_directory: String,
    /// Database, slide assets and cached results live here.
    pub data_directory: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub thumbnails: ThumbnailConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 4)
}

impl Config {
    /// Builds a complete config with every directory rooted under `root`.
    pub fn default_for<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            version: "1.0".to_string(),
            work_directory: root.join("work").to_string_lossy().to_string(),
            data_directory: root.join("data").to_string_lossy().to_string(),
            worker_count: default_worker_count(),
            renderer: RendererConfig::default(),
            validation: ValidationConfig::default(),
            cache: CacheConfig::default(),
            persistence: PersistenceConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_directory)
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_directory)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("slidekit.db")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir().join("cache")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir().join("assets")
    }
}

/// Canonical data directory: `~/.slidekit`.
pub fn default_data_directory() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".slidekit"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default = "default_true")]
    pub session_enabled: bool,
    #[serde(default = "default_session_host")]
    pub session_host: String,
    #[serde(default = "default_session_port")]
    pub session_port: u16,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_slide_retries")]
    pub slide_retries: u32,
    #[serde(default = "default_soffice_path")]
    pub soffice_path: String,
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
}

impl RendererConfig {
    pub fn connect_retry(&self) -> RetryPolicy {
        RetryPolicy::with_retries(
            self.connect_retries,
            Duration::from_millis(self.connect_backoff_ms),
        )
    }

    /// Per-slide retries on a live session, without waiting in between.
    pub fn slide_retry(&self) -> RetryPolicy {
        RetryPolicy::with_retries(self.slide_retries, Duration::ZERO)
    }
}

fn default_true() -> bool {
    true
}

fn default_session_host() -> String {
    "127.0.0.1".to_string()
}

fn default_session_port() -> u16 {
    2002
}

fn default_connect_retries() -> u32 {
    5
}

fn default_connect_backoff_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_slide_retries() -> u32 {
    3
}

fn default_soffice_path() -> String {
    "soffice".to_string()
}

fn default_batch_timeout_secs() -> u64 {
    120
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            session_enabled: true,
            session_host: default_session_host(),
            session_port: default_session_port(),
            connect_retries: default_connect_retries(),
            connect_backoff_ms: default_connect_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            slide_retries: default_slide_retries(),
            soffice_path: default_soffice_path(),
            batch_timeout_secs: default_batch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,
    /// Candidates scoring within this distance of the best are tie-broken by position.
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f64,
    /// Move validated shapes onto the matched image box.
    #[serde(default)]
    pub nudge_validated: bool,
}

fn default_high_threshold() -> f64 {
    0.90
}

fn default_low_threshold() -> f64 {
    0.70
}

fn default_tie_epsilon() -> f64 {
    0.02
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            high_threshold: default_high_threshold(),
            low_threshold: default_low_threshold(),
            tie_epsilon: default_tie_epsilon(),
            nudge_validated: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_true")]
    pub persist_to_disk: bool,
}

fn default_cache_entries() -> u64 {
    256
}

fn default_cache_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl_secs(),
            persist_to_disk: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_retries")]
    pub max_retries: u32,
    #[serde(default = "default_persistence_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl PersistenceConfig {
    /// Policy for persistence writes: one attempt plus `max_retries`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
        )
    }
}

fn default_persistence_retries() -> u32 {
    3
}

fn default_persistence_backoff_ms() -> u64 {
    200
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_persistence_retries(),
            initial_backoff_ms: default_persistence_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumbnail_width")]
    pub width: u32,
}

fn default_thumbnail_width() -> u32 {
    250
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: default_thumbnail_width(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
