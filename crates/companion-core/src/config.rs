//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: `<config_dir>/companion/config.toml`
//! 3. Project config: `.companion/config.toml`
//! 4. Environment variables: `COMPANION_*`
//!
//! # Example Config
//!
//! ```toml
//! [broker]
//! management_url = "http://rabbit.internal:15672"
//! username = "ops"
//! password = "secret"
//! vhost = "/"
//!
//! [simulator]
//! status_interval = 100
//! max_publishers = 32
//!
//! [tracer]
//! dead_letter_suffixes = [".dlq", ".dead", ".parking"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Every key a config file may contain, in dot notation.
const KNOWN_KEYS: &[&str] = &[
    "broker",
    "broker.management_url",
    "broker.username",
    "broker.password",
    "broker.vhost",
    "broker.timeout_secs",
    "simulator",
    "simulator.status_interval",
    "simulator.max_message_size",
    "simulator.max_publishers",
    "tracer",
    "tracer.dead_letter_suffixes",
];

// ═══════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub broker: BrokerConfig,
    pub simulator: SimulatorConfig,
    pub tracer: TracerConfig,
}

/// Management API connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub management_url: String,
    pub username: String,
    pub password: String,
    pub vhost: String,
    pub timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            management_url: "http://localhost:15672".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Flow simulator limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Messages per publisher loop between status pushes
    pub status_interval: usize,
    /// Largest accepted payload in bytes
    pub max_message_size: usize,
    pub max_publishers: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            status_interval: 100,
            max_message_size: 1_048_576,
            max_publishers: 64,
        }
    }
}

/// Dead-letter tracer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerConfig {
    /// Queue-name suffixes that mark a dead-letter queue (case-insensitive)
    pub dead_letter_suffixes: Vec<String>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            dead_letter_suffixes: vec![".dlq".to_string(), ".dead".to_string()],
        }
    }
}

/// Partial configuration with `Option<T>` fields for explicit-key merge semantics.
///
/// Only keys present in a file are `Some` and override lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub broker: Option<PartialBrokerConfig>,
    #[serde(default)]
    pub simulator: Option<PartialSimulatorConfig>,
    #[serde(default)]
    pub tracer: Option<PartialTracerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialBrokerConfig {
    #[serde(default)]
    pub management_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub vhost: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSimulatorConfig {
    #[serde(default)]
    pub status_interval: Option<usize>,
    #[serde(default)]
    pub max_message_size: Option<usize>,
    #[serde(default)]
    pub max_publishers: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialTracerConfig {
    #[serde(default)]
    pub dead_letter_suffixes: Option<Vec<String>>,
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy.
///
/// # Errors
///
/// Returns error if:
/// - A config file is malformed TOML or contains unknown keys
/// - An environment variable has an unparseable value
/// - The merged config fails validation
pub async fn load_config() -> Result<Config> {
    load_config_from(global_config_path().ok(), project_config_path().ok()).await
}

/// Load configuration using explicit file locations for the two file layers.
///
/// Missing files are skipped.
pub async fn load_config_from(global: Option<PathBuf>, project: Option<PathBuf>) -> Result<Config> {
    let mut config = Config::default();

    for path in [global, project].into_iter().flatten() {
        match load_partial_toml_file(&path).await {
            Ok(partial) => {
                tracing::debug!(path = %path.display(), "Loaded config layer");
                config.merge_partial(partial);
            }
            Err(Error::IoError(_)) => {}
            Err(e) => return Err(e),
        }
    }

    config.apply_env_vars()?;
    config.validate()?;
    Ok(config)
}

fn project_config_path() -> Result<PathBuf> {
    std::env::current_dir()
        .map(|dir| dir.join(".companion/config.toml"))
        .map_err(|e| Error::IoError(format!("Failed to get current directory: {e}")))
}

fn global_config_path() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "companion")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .ok_or_else(|| Error::IoError("Failed to determine global config directory".to_string()))
}

/// Load a TOML file into a [`PartialConfig`].
///
/// # Errors
///
/// Returns error if:
/// - File cannot be read (`IoError`)
/// - File is larger than 1 MiB
/// - TOML is malformed
/// - Unknown configuration keys are present
pub async fn load_partial_toml_file(path: &Path) -> Result<PartialConfig> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        Error::IoError(format!(
            "Failed to read config file metadata {}: {e}",
            path.display()
        ))
    })?;

    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(Error::InvalidConfig(format!(
            "Config file {} exceeds maximum size of {MAX_CONFIG_FILE_SIZE} bytes",
            path.display()
        )));
    }

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::IoError(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    let value: toml::Value = toml::from_str(&content).map_err(|e| {
        Error::ParseError(format!(
            "Failed to parse config file {}: {e}",
            path.display()
        ))
    })?;
    validate_toml_keys(&value)?;

    toml::from_str(&content)
        .map_err(|e| Error::ParseError(format!("Failed to parse config: {}: {e}", path.display())))
}

/// Reject a dot-notation key that no config section defines.
pub fn validate_key(key: &str) -> Result<()> {
    if KNOWN_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "Unknown configuration key '{key}'"
        )))
    }
}

fn extract_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let toml::Value::Table(table) = value {
        for (key, val) in table {
            let full_key = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            keys.push(full_key.clone());
            if val.is_table() {
                keys.extend(extract_keys(val, &full_key));
            }
        }
    }
    keys
}

fn validate_toml_keys(value: &toml::Value) -> Result<()> {
    extract_keys(value, "")
        .iter()
        .try_for_each(|key| validate_key(key))
}

// ═══════════════════════════════════════════════════════════════════════════
// MERGE / ENV / VALIDATE
// ═══════════════════════════════════════════════════════════════════════════

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    std::env::var(name).ok().map_or(Ok(None), |value| {
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::InvalidConfig(format!("Invalid {name} value: {e}")))
    })
}

impl Config {
    /// Merge a partial config; only keys present in `partial` override.
    pub fn merge_partial(&mut self, partial: PartialConfig) {
        if let Some(broker) = partial.broker {
            let target = &mut self.broker;
            if let Some(v) = broker.management_url {
                target.management_url = v;
            }
            if let Some(v) = broker.username {
                target.username = v;
            }
            if let Some(v) = broker.password {
                target.password = v;
            }
            if let Some(v) = broker.vhost {
                target.vhost = v;
            }
            if let Some(v) = broker.timeout_secs {
                target.timeout_secs = v;
            }
        }
        if let Some(simulator) = partial.simulator {
            let target = &mut self.simulator;
            if let Some(v) = simulator.status_interval {
                target.status_interval = v;
            }
            if let Some(v) = simulator.max_message_size {
                target.max_message_size = v;
            }
            if let Some(v) = simulator.max_publishers {
                target.max_publishers = v;
            }
        }
        if let Some(tracer) = partial.tracer {
            if let Some(v) = tracer.dead_letter_suffixes {
                self.tracer.dead_letter_suffixes = v;
            }
        }
    }

    /// Apply `COMPANION_*` environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable does not parse
    pub fn apply_env_vars(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("COMPANION_MANAGEMENT_URL") {
            self.broker.management_url = value;
        }
        if let Ok(value) = std::env::var("COMPANION_USERNAME") {
            self.broker.username = value;
        }
        if let Ok(value) = std::env::var("COMPANION_PASSWORD") {
            self.broker.password = value;
        }
        if let Ok(value) = std::env::var("COMPANION_VHOST") {
            self.broker.vhost = value;
        }
        if let Some(value) = env_parse("COMPANION_TIMEOUT_SECS")? {
            self.broker.timeout_secs = value;
        }
        if let Some(value) = env_parse("COMPANION_STATUS_INTERVAL")? {
            self.simulator.status_interval = value;
        }
        if let Some(value) = env_parse("COMPANION_MAX_MESSAGE_SIZE")? {
            self.simulator.max_message_size = value;
        }
        if let Some(value) = env_parse("COMPANION_MAX_PUBLISHERS")? {
            self.simulator.max_publishers = value;
        }
        // Comma-separated
        if let Ok(value) = std::env::var("COMPANION_DEAD_LETTER_SUFFIXES") {
            self.tracer.dead_letter_suffixes = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    /// Check the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending key
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.broker.management_url).map_err(|e| {
            Error::InvalidConfig(format!(
                "broker.management_url '{}' is not a valid URL: {e}",
                self.broker.management_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "broker.management_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.broker.username.is_empty() || self.broker.password.is_empty() {
            return Err(Error::InvalidConfig(
                "broker.username and broker.password are required".to_string(),
            ));
        }
        if self.broker.vhost.is_empty() {
            return Err(Error::InvalidConfig("broker.vhost cannot be empty".to_string()));
        }

        let zero = [
            ("broker.timeout_secs", self.broker.timeout_secs == 0),
            ("simulator.status_interval", self.simulator.status_interval == 0),
            ("simulator.max_message_size", self.simulator.max_message_size == 0),
            ("simulator.max_publishers", self.simulator.max_publishers == 0),
        ];
        if let Some((key, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(Error::InvalidConfig(format!("{key} must be greater than 0")));
        }

        if self.tracer.dead_letter_suffixes.iter().any(String::is_empty) {
            return Err(Error::InvalidConfig(
                "tracer.dead_letter_suffixes cannot contain empty entries".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broker.vhost, "/");
        assert_eq!(config.simulator.status_interval, 100);
        assert_eq!(config.tracer.dead_letter_suffixes, vec![".dlq", ".dead"]);
    }

    #[test]
    fn test_partial_merge_only_overrides_present_keys() {
        let mut config = Config::default();
        config.merge_partial(PartialConfig {
            broker: Some(PartialBrokerConfig {
                username: Some("ops".into()),
                ..PartialBrokerConfig::default()
            }),
            ..PartialConfig::default()
        });
        assert_eq!(config.broker.username, "ops");
        assert_eq!(config.broker.password, "guest");
        assert_eq!(config.simulator, SimulatorConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = Config::default();
        config.broker.management_url = "ftp://rabbit".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.broker.management_url = "not a url".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.simulator.max_publishers = 0;
        let err = config.validate().err().map(|e| e.to_string());
        assert!(matches!(err, Some(msg) if msg.contains("simulator.max_publishers")));
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("broker.vhost").is_ok());
        assert!(validate_key("broker.vhots").is_err());
    }

    #[tokio::test]
    async fn test_unknown_keys_rejected() -> Result<()> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| Error::IoError(format!("Failed to create temp dir: {e}")))?;
        let config_path = temp_dir.path().join("config.toml");
        tokio::fs::write(&config_path, b"[broker]\nusername = \"a\"\ntypo_key = 1\n").await?;

        let result = load_partial_toml_file(&config_path).await;
        assert!(matches!(result, Err(Error::InvalidConfig(msg)) if msg.contains("broker.typo_key")));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_toml_returns_parse_error() -> Result<()> {
        let temp_dir = tempfile::tempdir()
            .map_err(|e| Error::IoError(format!("Failed to create temp dir: {e}")))?;
        let config_path = temp_dir.path().join("config.toml");
        tokio::fs::write(&config_path, b"[broker\nusername = ").await?;

        let result = load_partial_toml_file(&config_path).await;
        assert!(matches!(result, Err(Error::ParseError(_))));
        Ok(())
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = tokio_test::block_on(load_partial_toml_file(Path::new(
            "/nonexistent/companion.toml",
        )));
        assert!(matches!(result, Err(Error::IoError(_))));
    }
}
