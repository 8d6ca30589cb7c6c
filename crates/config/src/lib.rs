//! Configuration loading, validation, and management for the context relay.
//!
//! Loads configuration from `~/.contextrelay/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.contextrelay/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Embedding provider selection
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Context store selection
    #[serde(default)]
    pub store: StoreConfig,

    /// Relay operation tuning
    #[serde(default)]
    pub relay: RelayConfig,

    /// Merge operation tuning
    #[serde(default)]
    pub merge: MergeConfig,

    /// Similarity search tuning
    #[serde(default)]
    pub search: SearchConfig,

    /// Event broadcaster tuning
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Expose `/test/*` routes that toggle backend availability and wipe data.
    #[serde(default)]
    pub enable_test_routes: bool,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
            enable_test_routes: false,
        }
    }
}

/// Which embedding implementation to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    #[default]
    Mock,
    Voyage,
    Openai,
}

impl EmbeddingProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Voyage => "voyage",
            Self::Openai => "openai",
        }
    }

    /// Vector length of the provider's default model.
    pub fn default_dimensions(&self) -> usize {
        match self {
            Self::Mock => 384,
            Self::Voyage => 1024,
            Self::Openai => 1536,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Mock)
    }
}

impl fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "voyage" => Ok(Self::Voyage),
            "openai" => Ok(Self::Openai),
            other => Err(ConfigError::ValidationError(format!(
                "unknown embedding provider: {other}"
            ))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    /// Model name; the provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Vector length; the provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override of the provider's API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Wrap a hosted provider in a fallback chain ending at the mock.
    #[serde(default = "default_true")]
    pub fallback_to_mock: bool,
}

fn default_batch_size() -> usize {
    128
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl EmbeddingConfig {
    pub fn effective_dimensions(&self) -> usize {
        self.dimensions
            .unwrap_or_else(|| self.provider.default_dimensions())
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            model: None,
            dimensions: None,
            api_key: None,
            base_url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            fallback_to_mock: true,
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("batch_size", &self.batch_size)
            .field("timeout_secs", &self.timeout_secs)
            .field("fallback_to_mock", &self.fallback_to_mock)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    #[default]
    Memory,
    Sqlite,
}

impl StoreBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for StoreBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoreBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::ValidationError(format!(
                "unknown store backend: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackendKind,

    /// Database file for the `sqlite` backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Minimum cosine similarity for a relayed fragment to count as a conflict.
    #[serde(default = "default_conflict_threshold")]
    pub conflict_threshold: f64,

    /// Refuse conflicting fragments instead of only reporting them.
    #[serde(default)]
    pub reject_conflicting: bool,
}

fn default_conflict_threshold() -> f64 {
    0.8
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            conflict_threshold: default_conflict_threshold(),
            reject_conflicting: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Threshold for the `semantic_similarity` merge strategy.
    #[serde(default = "default_merge_threshold")]
    pub similarity_threshold: f64,
}

fn default_merge_threshold() -> f64 {
    0.9
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_merge_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_search_threshold() -> f64 {
    0.8
}
fn default_top_k() -> usize {
    10
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_search_threshold(),
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Events per type per second; 0 disables throttling.
    #[serde(default = "default_throttle")]
    pub throttle_per_second: usize,

    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// SSE keep-alive interval.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_history_size() -> usize {
    1000
}
fn default_throttle() -> usize {
    10
}
fn default_subscriber_buffer() -> usize {
    100
}
fn default_keepalive_secs() -> u64 {
    30
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            throttle_per_second: default_throttle(),
            subscriber_buffer: default_subscriber_buffer(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.contextrelay/config.toml).
    ///
    /// Environment variables override file values:
    /// - `CONTEXT_RELAY_HOST`, `CONTEXT_RELAY_PORT`
    /// - `CONTEXT_RELAY_EMBEDDING_PROVIDER`
    /// - `CONTEXT_RELAY_STORE`, `CONTEXT_RELAY_SQLITE_PATH`
    /// - `VOYAGE_API_KEY` / `OPENAI_API_KEY` when no key is configured
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CONTEXT_RELAY_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = lookup("CONTEXT_RELAY_PORT") {
            self.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("CONTEXT_RELAY_PORT is not a port: {port}"))
            })?;
        }
        if let Some(provider) = lookup("CONTEXT_RELAY_EMBEDDING_PROVIDER") {
            self.embedding.provider = provider.parse()?;
        }
        if let Some(backend) = lookup("CONTEXT_RELAY_STORE") {
            self.store.backend = backend.parse()?;
        }
        if let Some(path) = lookup("CONTEXT_RELAY_SQLITE_PATH") {
            self.store.sqlite_path = Some(PathBuf::from(path));
        }

        if self.embedding.api_key.is_none() {
            self.embedding.api_key = match self.embedding.provider {
                EmbeddingProviderKind::Voyage => lookup("VOYAGE_API_KEY"),
                EmbeddingProviderKind::Openai => lookup("OPENAI_API_KEY"),
                EmbeddingProviderKind::Mock => None,
            };
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".contextrelay")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            ("relay.conflict_threshold", self.relay.conflict_threshold),
            ("merge.similarity_threshold", self.merge.similarity_threshold),
            ("search.similarity_threshold", self.search.similarity_threshold),
        ];
        for (name, value) in thresholds {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between -1.0 and 1.0"
                )));
            }
        }

        if self.embedding.effective_dimensions() == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimensions must be > 0".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.batch_size must be > 0".into(),
            ));
        }
        if self.events.history_size == 0 {
            return Err(ConfigError::ValidationError(
                "events.history_size must be > 0".into(),
            ));
        }
        if self.events.subscriber_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "events.subscriber_buffer must be > 0".into(),
            ));
        }
        if self.search.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "search.top_k must be > 0".into(),
            ));
        }
        if self.store.backend == StoreBackendKind::Sqlite && self.store.sqlite_path.is_none() {
            return Err(ConfigError::ValidationError(
                "store.sqlite_path is required for the sqlite backend".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Mock);
        assert_eq!(config.embedding.effective_dimensions(), 384);
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
        assert_eq!(config.relay.conflict_threshold, 0.8);
        assert_eq!(config.merge.similarity_threshold, 0.9);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.events.history_size, config.events.history_size);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[embedding]
provider = "voyage"

[relay]
conflict_threshold = 0.85
reject_conflicting = true
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Voyage);
        assert_eq!(config.embedding.effective_dimensions(), 1024);
        assert_eq!(config.relay.conflict_threshold, 0.85);
        assert!(config.relay.reject_conflicting);
        assert_eq!(config.gateway.host, "127.0.0.1");
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut config = AppConfig::default();
        config.merge.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn sqlite_without_path_rejected() {
        let mut config = AppConfig::default();
        config.store.backend = StoreBackendKind::Sqlite;
        assert!(config.validate().is_err());
        config.store.sqlite_path = Some(PathBuf::from("/tmp/relay.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().gateway.port, 8000);
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway]\nport = 9100\n").unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.gateway.port, 9100);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[gateway\nport = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("CONTEXT_RELAY_PORT", "9001"),
            ("CONTEXT_RELAY_EMBEDDING_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("CONTEXT_RELAY_STORE", "sqlite"),
            ("CONTEXT_RELAY_SQLITE_PATH", "/tmp/x.db"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.gateway.port, 9001);
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Openai);
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.store.backend, StoreBackendKind::Sqlite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_env_port_is_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|k| (k == "CONTEXT_RELAY_PORT").then(|| "http".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.embedding.api_key = Some("super-secret".into());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("8000"));
        assert!(toml_str.contains("mock"));
    }
}
