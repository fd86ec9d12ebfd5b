//! Configuration management for the intent tracker
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::error::TrackerError;
use crate::intent::OperationDescriptor;
use crate::watcher::PollReport;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "INTENT_TRACKER_CONFIG";

/// Upper bound for the synthetic stage delay; anything longer stops being a progress cue
const MAX_SYNTHETIC_DELAY_MS: u64 = 10_000;

lazy_static! {
    static ref ENV_VAR_PATTERN: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tracker: TrackerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Delay between two polls of the settlement source, per watcher
    pub poll_interval_ms: u64,
    /// How long the first stage must persist before the synthetic advance
    pub synthetic_delay_ms: u64,
    /// Buffer size of each tracker's settlement broadcast channel
    pub settlement_channel_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            synthetic_delay_ms: 400,
            settlement_channel_capacity: 256,
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn synthetic_delay(&self) -> Duration {
        Duration::from_millis(self.synthetic_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,intent_tracker=debug".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Scripted intents replayed by the `intent-tracker` binary
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub intents: Vec<ReplayIntent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayIntent {
    pub id: String,
    pub descriptor: OperationDescriptor,
    /// Poll reports handed out in order; the last one repeats
    pub steps: Vec<PollReport>,
}

impl Settings {
    /// Load settings from the file named by `INTENT_TRACKER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.tracker.poll_interval_ms == 0 {
            return Err(TrackerError::Config("poll_interval_ms must be positive".to_string()).into());
        }

        if self.tracker.settlement_channel_capacity == 0 {
            return Err(TrackerError::Config(
                "settlement_channel_capacity must be positive".to_string(),
            )
            .into());
        }

        if self.tracker.synthetic_delay_ms > MAX_SYNTHETIC_DELAY_MS {
            return Err(TrackerError::Config(format!(
                "synthetic_delay_ms must not exceed {}",
                MAX_SYNTHETIC_DELAY_MS
            ))
            .into());
        }

        for intent in &self.replay.intents {
            if intent.id.is_empty() {
                anyhow::bail!("Replay intent has an empty id");
            }
            if intent.steps.is_empty() {
                tracing::warn!("Replay intent {} has no steps - it will never settle", intent.id);
            }
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentKind;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("INTENT_TRACKER_TEST_VAR", "test_value");
        let input = "filter = \"info,${INTENT_TRACKER_TEST_VAR}=debug\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "filter = \"info,test_value=debug\"");
    }

    #[test]
    fn test_defaults_apply_to_missing_sections() {
        let settings = Settings::from_toml_str("[tracker]\npoll_interval_ms = 500\n").unwrap();
        assert_eq!(settings.tracker.poll_interval(), Duration::from_millis(500));
        assert_eq!(settings.tracker.synthetic_delay(), Duration::from_millis(400));
        assert!(settings.metrics.enabled);
        assert!(settings.replay.intents.is_empty());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = Settings::from_toml_str("[tracker]\npoll_interval_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_oversized_synthetic_delay_rejected() {
        assert!(Settings::from_toml_str("[tracker]\nsynthetic_delay_ms = 60000\n").is_err());
    }

    #[test]
    fn test_load_replay_file() {
        let toml = r#"
[tracker]
poll_interval_ms = 250

[[replay.intents]]
id = "dep-1"

[replay.intents.descriptor]
kind = "deposit"
amount = 100
chain_name = "eth"
user_address = "0xabc"

[replay.intents.descriptor.token]
symbol = "USDC"
chain = "eth"
decimals = 6

[replay.intents.descriptor.token_deployment]
chain = "eth"
address = "0xa0b8"
decimals = 6

[[replay.intents.steps]]
stage = "detecting"

[[replay.intents.steps]]
stage = "complete"
tx_hash = "0xfeed"
terminal = true
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.replay.intents.len(), 1);

        let intent = &settings.replay.intents[0];
        assert_eq!(intent.descriptor.kind(), IntentKind::Deposit);
        assert_eq!(intent.steps.len(), 2);
        assert!(intent.steps[1].terminal);
        assert_eq!(intent.steps[1].tx_hash.as_deref(), Some("0xfeed"));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Settings::load_from(Path::new("/nonexistent/intent-tracker.toml")).unwrap_err();
        assert!(err.to_string().contains("intent-tracker.toml"));
    }
}
