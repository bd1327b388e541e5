//! Configuration loading, validation, and management for Parley.
//!
//! Loads configuration from `~/.parley/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible completion endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model used for new agents when none is given
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Max tokens per agent completion
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "anthropic/claude-haiku-4.5".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("engine", &self.engine)
            .field("routing", &self.routing)
            .field("memory", &self.memory)
            .field("tools", &self.tools)
            .field("database", &self.database)
            .finish()
    }
}

/// Turn pacing and tool-loop bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pre-turn delay when a session is in slow mode
    #[serde(default = "default_slow_delay_ms")]
    pub slow_delay_ms: u64,

    /// Pause between turns of a bounded run
    #[serde(default = "default_turn_pause_ms")]
    pub turn_pause_ms: u64,

    /// Pause between turns of an open-ended run
    #[serde(default = "default_infinite_pause_ms")]
    pub infinite_pause_ms: u64,

    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Deadline for each completion call
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
}

fn default_slow_delay_ms() -> u64 {
    5000
}
fn default_turn_pause_ms() -> u64 {
    500
}
fn default_infinite_pause_ms() -> u64 {
    1000
}
fn default_max_tool_rounds() -> usize {
    10
}
fn default_completion_timeout_secs() -> u64 {
    120
}

impl EngineConfig {
    pub fn slow_delay(&self) -> Duration {
        Duration::from_millis(self.slow_delay_ms)
    }

    pub fn turn_pause(&self) -> Duration {
        Duration::from_millis(self.turn_pause_ms)
    }

    pub fn infinite_pause(&self) -> Duration {
        Duration::from_millis(self.infinite_pause_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slow_delay_ms: default_slow_delay_ms(),
            turn_pause_ms: default_turn_pause_ms(),
            infinite_pause_ms: default_infinite_pause_ms(),
            max_tool_rounds: default_max_tool_rounds(),
            completion_timeout_secs: default_completion_timeout_secs(),
        }
    }
}

/// Speaker routing for model-routed sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// How many recent messages the router reads
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Transcript tail shown to the router
    #[serde(default = "default_transcript_messages")]
    pub transcript_messages: usize,

    #[serde(default = "default_persona_chars")]
    pub persona_chars: usize,

    #[serde(default = "default_message_chars")]
    pub message_chars: usize,

    #[serde(default = "default_router_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_router_temperature")]
    pub temperature: f32,
}

fn default_history_limit() -> usize {
    40
}
fn default_transcript_messages() -> usize {
    20
}
fn default_persona_chars() -> usize {
    500
}
fn default_message_chars() -> usize {
    400
}
fn default_router_max_tokens() -> u32 {
    30
}
fn default_router_temperature() -> f32 {
    0.1
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            transcript_messages: default_transcript_messages(),
            persona_chars: default_persona_chars(),
            message_chars: default_message_chars(),
            max_tokens: default_router_max_tokens(),
            temperature: default_router_temperature(),
        }
    }
}

/// Summarizing compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Uncovered messages allowed before a new summary is produced
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: usize,

    /// Messages kept verbatim after summarizing
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

fn default_summarize_threshold() -> usize {
    40
}
fn default_keep_recent() -> usize {
    15
}
fn default_summary_model() -> String {
    "anthropic/claude-haiku-4.5".into()
}
fn default_summary_max_tokens() -> u32 {
    1000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            summarize_threshold: default_summarize_threshold(),
            keep_recent: default_keep_recent(),
            summary_model: default_summary_model(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

/// Capability execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Deadline for each tool execution
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,

    /// Idle time after which per-session HTTP clients are dropped
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// Shared scratchpad file; defaults to `~/.parley/scratchpad.md`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratchpad_path: Option<PathBuf>,

    /// Interpreters user capabilities may run under
    #[serde(default = "default_interpreters")]
    pub interpreters: Vec<String>,

    /// Environment variables passed through to capability scripts
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,
}

fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_session_idle_secs() -> u64 {
    300
}
fn default_interpreters() -> Vec<String> {
    vec!["sh".into(), "bash".into(), "python3".into(), "node".into()]
}
fn default_env_passthrough() -> Vec<String> {
    vec!["PATH".into(), "HOME".into(), "LANG".into(), "TZ".into()]
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn scratchpad_path(&self) -> PathBuf {
        self.scratchpad_path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("scratchpad.md"))
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            session_idle_secs: default_session_idle_secs(),
            scratchpad_path: None,
            interpreters: default_interpreters(),
            env_passthrough: default_env_passthrough(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; `:memory:` keeps everything in process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("parley.db"))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: None }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.parley/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `PARLEY_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply the same environment overrides as [`load`](Self::load).
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
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

    /// Apply environment overrides through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("PARLEY_API_KEY")
            .or_else(|| self.api_key.clone())
            .or_else(|| lookup("OPENROUTER_API_KEY"))
            .or_else(|| lookup("OPENAI_API_KEY"))
        {
            self.api_key = Some(key);
        }

        if let Some(model) = lookup("PARLEY_MODEL") {
            self.default_model = model;
        }

        if let Some(path) = lookup("PARLEY_DATABASE") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.engine.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_tool_rounds must be at least 1".into(),
            ));
        }

        if self.memory.keep_recent == 0 || self.memory.keep_recent >= self.memory.summarize_threshold {
            return Err(ConfigError::ValidationError(
                "memory.keep_recent must be between 1 and summarize_threshold".into(),
            ));
        }

        if self.tools.timeout_secs == 0 || self.engine.completion_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("timeouts must be greater than 0".into()));
        }

        if self.routing.history_limit < self.routing.transcript_messages {
            return Err(ConfigError::ValidationError(
                "routing.history_limit must cover routing.transcript_messages".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            engine: EngineConfig::default(),
            routing: RoutingConfig::default(),
            memory: MemoryConfig::default(),
            tools: ToolsConfig::default(),
            database: DatabaseConfig::default(),
        }
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

impl From<ConfigError> for parley_core::Error {
    fn from(err: ConfigError) -> Self {
        parley_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.slow_delay_ms, 5000);
        assert_eq!(config.engine.max_tool_rounds, 10);
        assert_eq!(config.memory.summarize_threshold, 40);
        assert_eq!(config.memory.keep_recent, 15);
        assert_eq!(config.tools.timeout_secs, 60);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.api_url, config.api_url);
        assert_eq!(parsed.routing.max_tokens, config.routing.max_tokens);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn keep_recent_must_stay_below_threshold() {
        let mut config = AppConfig::default();
        config.memory.keep_recent = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_model, "anthropic/claude-haiku-4.5");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "default_model = \"openai/gpt-4o-mini\"\n[engine]\nslow_delay_ms = 100\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_model, "openai/gpt-4o-mini");
        assert_eq!(config.engine.slow_delay_ms, 100);
        assert_eq!(config.engine.turn_pause_ms, 500);
        assert_eq!(config.routing.history_limit, 40);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "engine = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_take_priority() {
        let env: HashMap<&str, &str> = [
            ("PARLEY_API_KEY", "sk-parley"),
            ("OPENROUTER_API_KEY", "sk-router"),
            ("PARLEY_MODEL", "meta/llama"),
            ("PARLEY_DATABASE", ":memory:"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("sk-parley"));
        assert_eq!(config.default_model, "meta/llama");
        assert_eq!(config.database.path(), PathBuf::from(":memory:"));
    }

    #[test]
    fn file_key_beats_fallback_env_keys() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|k| (k == "OPENROUTER_API_KEY").then(|| "sk-router".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter.ai"));
        assert!(toml_str.contains("[engine]"));
    }
}
