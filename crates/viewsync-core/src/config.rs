use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::error::ErrorCode;

pub const DEFAULT_HISTORY_LIMIT: usize = 5;
pub const DEFAULT_STORAGE_KEY: &str = "connectorStateProxy";
pub const DEFAULT_FILTER_CHANNEL: &str = "statefilter";
pub const DEFAULT_SELECTION_CHANNEL: &str = "stateSelectionFilter";

/// Environment variable overriding `history.limit`.
pub const HISTORY_LIMIT_ENV: &str = "VIEWSYNC_HISTORY_LIMIT";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
            storage_key: default_storage_key(),
        }
    }
}

/// Process-wide "use merge" defaults; every mutation may override them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub filters: bool,
    #[serde(default)]
    pub selections: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_filter_channel")]
    pub filters: String,
    #[serde(default = "default_selection_channel")]
    pub selections: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            filters: default_filter_channel(),
            selections: default_selection_channel(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Partition key stamped on every snapshot and used to filter on load.
    #[serde(default)]
    pub partition: Option<String>,
    /// Hierarchy targeted by members-query private selections.
    #[serde(default)]
    pub subject_name: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("history.limit must be at least 1")]
    ZeroHistoryLimit,

    #[error("filter and selection channels must differ (both are '{0}')")]
    DuplicateChannel(String),

    #[error("{HISTORY_LIMIT_ENV} is not a positive integer: '{0}'")]
    BadEnvLimit(String),
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidConfig
    }
}

impl EngineConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the history bound is zero or both
    /// channels share a name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history.limit == 0 {
            return Err(ConfigError::ZeroHistoryLimit);
        }
        if self.channels.filters == self.channels.selections {
            return Err(ConfigError::DuplicateChannel(self.channels.filters.clone()));
        }
        Ok(())
    }

    /// Apply environment overrides on top of file values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BadEnvLimit`] for an unparsable limit.
    pub fn apply_env(&mut self, history_limit: Option<&str>) -> Result<(), ConfigError> {
        if let Some(raw) = history_limit {
            let limit = raw
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::BadEnvLimit(raw.to_string()))?;
            self.history.limit = limit;
        }
        Ok(())
    }
}

/// Read `<root>/.viewsync/config.toml`, apply `VIEWSYNC_HISTORY_LIMIT`, validate.
///
/// # Errors
///
/// Fails when the file is unreadable, is not valid TOML, or holds invalid values.
pub fn load_config(root: &Path) -> Result<EngineConfig> {
    let path = root.join(".viewsync/config.toml");
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str::<EngineConfig>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        EngineConfig::default()
    };

    let env_limit = env::var(HISTORY_LIMIT_ENV).ok();
    config
        .apply_env(env_limit.as_deref())
        .context("Invalid environment override")?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    Ok(config)
}

const fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_filter_channel() -> String {
    DEFAULT_FILTER_CHANNEL.to_string()
}

fn default_selection_channel() -> String {
    DEFAULT_SELECTION_CHANNEL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(root: &Path, content: &str) {
        let dir = root.join(".viewsync");
        std::fs::create_dir_all(&dir).expect("create .viewsync");
        std::fs::write(dir.join("config.toml"), content).expect("write config");
    }

    #[test]
    fn missing_config_uses_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.history.limit, 5);
        assert_eq!(cfg.history.storage_key, "connectorStateProxy");
        assert_eq!(cfg.channels.filters, "statefilter");
        assert_eq!(cfg.channels.selections, "stateSelectionFilter");
        assert!(!cfg.merge.filters);
        assert!(cfg.session.partition.is_none());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(
            dir.path(),
            r#"
[history]
limit = 3

[session]
partition = "study-42"
"#,
        );

        let content =
            std::fs::read_to_string(dir.path().join(".viewsync/config.toml")).expect("read");
        let cfg: EngineConfig = toml::from_str(&content).expect("parse");

        assert_eq!(cfg.history.limit, 3);
        assert_eq!(cfg.history.storage_key, DEFAULT_STORAGE_KEY);
        assert_eq!(cfg.session.partition.as_deref(), Some("study-42"));
        assert_eq!(cfg.channels, ChannelConfig::default());
    }

    #[test]
    fn validate_rejects_zero_limit_and_shared_channel() {
        let mut cfg = EngineConfig::default();
        cfg.history.limit = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroHistoryLimit));

        let mut cfg = EngineConfig::default();
        cfg.channels.selections = cfg.channels.filters.clone();
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateChannel(_))));
        assert_eq!(ConfigError::ZeroHistoryLimit.code(), ErrorCode::InvalidConfig);
    }

    #[test]
    fn env_limit_overrides_file() {
        let mut cfg = EngineConfig::default();
        cfg.apply_env(Some(" 9 ")).expect("apply");
        assert_eq!(cfg.history.limit, 9);

        assert!(matches!(
            cfg.apply_env(Some("lots")),
            Err(ConfigError::BadEnvLimit(_))
        ));
        cfg.apply_env(None).expect("noop");
        assert_eq!(cfg.history.limit, 9);
    }

    #[test]
    fn load_config_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(dir.path(), "[history\nlimit = ");
        let err = load_config(dir.path()).expect_err("must fail");
        assert!(err.to_string().contains("Failed to parse"));
    }
}
