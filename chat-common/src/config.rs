//! Configuration management for the chat memory services.
//!
//! Configuration lives in a single file at `~/.chat-memory/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `CHAT_MEMORY_DB_PATH` → memory.db_path
//! - `DATABASE_URL` → memory.db_path (a leading `sqlite:///` is stripped)
//! - `CHAT_MEMORY_BUFFER_WINDOW` → memory.buffer_window
//! - `CHAT_MEMORY_SUMMARY_THRESHOLD` → memory.summary_threshold
//! - `CHAT_MEMORY_STORE_TIMEOUT_MS` → memory.store_timeout_ms
//! - `LOG_LEVEL` → observability.log_level
//! - `LOG_FORMAT` → observability.log_format
//! - `MODEL_NAME` → summarizer.model

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".chat-memory"),
        |dirs| dirs.home_dir().join(".chat-memory"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Default location of the session database.
pub fn default_db_path() -> PathBuf {
    config_dir().join("chat_memory.db")
}

// ============================================================================
// Memory Configuration
// ============================================================================

/// Session memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Database path (for `SQLite`). Falls back to [`default_db_path`].
    #[serde(default)]
    pub db_path: Option<String>,

    /// Number of most recent turns that are always served verbatim
    #[serde(default = "default_buffer_window")]
    pub buffer_window: usize,

    /// Turn count at which a session switches to summary mode.
    /// Must be >= `buffer_window`.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: usize,

    /// Upper bound for a single store call, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Upper bound for waiting on a per-session write lock, in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Upper bound for one summarizer call, in milliseconds
    #[serde(default = "default_summarizer_timeout_ms")]
    pub summarizer_timeout_ms: u64,

    /// Immediate retries for transient store faults (busy/locked database)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_buffer_window() -> usize {
    10
}

fn default_summary_threshold() -> usize {
    15
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

fn default_summarizer_timeout_ms() -> u64 {
    20_000
}

fn default_max_retries() -> u32 {
    2
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            buffer_window: default_buffer_window(),
            summary_threshold: default_summary_threshold(),
            store_timeout_ms: default_store_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            summarizer_timeout_ms: default_summarizer_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl MemoryConfig {
    /// Resolved database path.
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .as_deref()
            .map_or_else(default_db_path, |p| PathBuf::from(expand_home(p)))
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), directories::UserDirs::new()) {
        (Some(rest), Some(dirs)) => dirs.home_dir().join(rest).to_string_lossy().into_owned(),
        _ => path.to_string(),
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Summarizer Configuration
// ============================================================================

/// Parameters handed to the language model when compacting history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum tokens for one summary
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "llama3-8b-8192".into()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    1000
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub summarizer: SummarizerConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using an arbitrary variable lookup.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            let path = url.strip_prefix("sqlite:///").unwrap_or(&url);
            self.memory.db_path = Some(path.to_string());
        }
        // The dedicated variable wins over the generic URL
        if let Some(path) = lookup("CHAT_MEMORY_DB_PATH") {
            self.memory.db_path = Some(path);
        }

        if let Some(v) = parse_var(&lookup, "CHAT_MEMORY_BUFFER_WINDOW") {
            self.memory.buffer_window = v;
        }
        if let Some(v) = parse_var(&lookup, "CHAT_MEMORY_SUMMARY_THRESHOLD") {
            self.memory.summary_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "CHAT_MEMORY_STORE_TIMEOUT_MS") {
            self.memory.store_timeout_ms = v;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.observability.log_level = level.to_lowercase();
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.observability.log_format = format.to_lowercase();
        }
        if let Some(model) = lookup("MODEL_NAME") {
            self.summarizer.model = model;
        }
    }

    /// Save configuration to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
