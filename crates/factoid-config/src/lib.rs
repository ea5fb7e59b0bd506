#![deny(unsafe_code)]

//! Configuration loading and validation for the factoid engine.
//!
//! Loads TOML configuration files and validates them. Provides the
//! [`AppConfig`] type as the central configuration structure shared by the
//! core engine and the CLI.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Slot names accepted in [`DisplayConfig::label_format`].
pub const LABEL_SLOTS: [&str; 4] = ["kind", "destination", "context", "key"];

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// How factoids are rendered and paced.
    #[serde(default)]
    pub display: DisplayConfig,

    /// Defaults applied to newly created factoids.
    #[serde(default)]
    pub triggers: TriggerConfig,

    /// Bounds on per-user transient state.
    #[serde(default)]
    pub session: SessionConfig,

    /// Factoid database location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Hostmask-based permission grants.
    #[serde(default)]
    pub permissions: Vec<PermissionRuleConfig>,
}

/// Display formatting and output pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Label template. Slots: `{kind}`, `{destination}`, `{context}`, `{key}`.
    #[serde(default = "default_label_format")]
    pub label_format: String,

    /// Minimum delay between two lines sent to the same destination.
    #[serde(default = "default_line_delay_ms")]
    pub line_delay_ms: u64,

    /// Maximum lines emitted per display (0 = unlimited).
    #[serde(default)]
    pub max_lines: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            label_format: default_label_format(),
            line_delay_ms: default_line_delay_ms(),
            max_lines: 0,
        }
    }
}

fn default_label_format() -> String {
    "[{context}{key}] ".to_string()
}

fn default_line_delay_ms() -> u64 {
    600
}

/// Defaults for factoid trigger behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Fires allowed per user per window (0 disables rate limiting).
    #[serde(default = "default_rate_limit_count")]
    pub default_rate_limit_count: u32,

    /// Window length in seconds (0 disables rate limiting).
    #[serde(default = "default_rate_limit_window_secs")]
    pub default_rate_limit_window_secs: u64,

    /// Deliver join/invite triggered output privately.
    #[serde(default = "default_notice_on_join")]
    pub default_notice_on_join: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            default_rate_limit_count: default_rate_limit_count(),
            default_rate_limit_window_secs: default_rate_limit_window_secs(),
            default_notice_on_join: default_notice_on_join(),
        }
    }
}

fn default_rate_limit_count() -> u32 {
    1
}

fn default_rate_limit_window_secs() -> u64 {
    120
}

fn default_notice_on_join() -> bool {
    true
}

/// Bounds on transient per-user state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of remembered dot targets.
    #[serde(default = "default_max_dot_targets")]
    pub max_dot_targets: usize,

    /// Interval between sweeps of stale rate-limit history (0 = never).
    #[serde(default = "default_hit_history_sweep_secs")]
    pub hit_history_sweep_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_dot_targets: default_max_dot_targets(),
            hit_history_sweep_secs: default_hit_history_sweep_secs(),
        }
    }
}

fn default_max_dot_targets() -> usize {
    4096
}

fn default_hit_history_sweep_secs() -> u64 {
    300
}

/// Factoid database storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the factoid database file.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> String {
    "factoids.toml".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A permission grant as expressed in TOML.
///
/// ## TOML Example
///
/// ```toml
/// [[permissions]]
/// hostmask = "*!*@staff.example.org"
/// grants = ["factoids.admin", "op"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRuleConfig {
    /// IRC hostmask glob (`nick!user@host`, `*` and `?` wildcards).
    pub hostmask: String,
    /// Permission names granted to matching users.
    #[serde(default)]
    pub grants: Vec<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_label_format(&self.display.label_format)?;
        if self.display.line_delay_ms > 60_000 {
            return Err(ConfigError::Validation(format!(
                "display.line_delay_ms must be at most 60000, got {}",
                self.display.line_delay_ms
            )));
        }
        if self.session.max_dot_targets == 0 {
            return Err(ConfigError::Validation(
                "session.max_dot_targets must be at least 1".to_string(),
            ));
        }
        if self.storage.path.is_empty() {
            return Err(ConfigError::Validation(
                "storage.path must not be empty".to_string(),
            ));
        }

        for (i, rule) in self.permissions.iter().enumerate() {
            if rule.hostmask.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "permissions[{i}].hostmask must not be empty"
                )));
            }
            if rule.grants.iter().any(|g| g.is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "permissions[{i}].grants must not contain empty names"
                )));
            }
        }

        Ok(())
    }

    /// Inter-line delay as a [`Duration`](std::time::Duration).
    pub fn line_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.display.line_delay_ms)
    }
}

fn validate_label_format(format: &str) -> Result<(), ConfigError> {
    let mut rest = format;
    let mut has_key = false;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(ConfigError::Validation(format!(
                "display.label_format has an unclosed slot: {format:?}"
            )));
        };
        let slot = &after[..close];
        if !LABEL_SLOTS.contains(&slot) {
            return Err(ConfigError::Validation(format!(
                "display.label_format slot {{{slot}}} must be one of {LABEL_SLOTS:?}"
            )));
        }
        has_key |= slot == "key";
        rest = &after[close + 1..];
    }
    if !has_key {
        return Err(ConfigError::Validation(
            "display.label_format must contain a {key} slot".to_string(),
        ));
    }
    Ok(())
}
