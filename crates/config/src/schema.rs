//! Config schema types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub robot: RobotConfig,
    pub logging: LoggingConfig,
    pub brain: BrainConfig,
}

/// Identity of the robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Name the robot answers to in `respond` listeners.
    pub name: String,
    /// Second name, e.g. a short prefix like `/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Workspace or team the robot belongs to, passed to adapters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            name: "herald".into(),
            alias: None,
            team_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (`error`, `warn`, `info`, `debug`, `trace`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    pub auto_save: bool,
    pub save_interval_secs: u64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            save_interval_secs: 5,
        }
    }
}

impl BrainConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg: HeraldConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, HeraldConfig::default());
        assert_eq!(cfg.robot.name, "herald");
        assert_eq!(cfg.brain.save_interval(), Duration::from_secs(5));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: HeraldConfig = toml::from_str(
            r#"
            [robot]
            alias = "/"

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.robot.name, "herald");
        assert_eq!(cfg.robot.alias.as_deref(), Some("/"));
        assert!(cfg.logging.json);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.brain.auto_save);
    }

    #[test]
    fn serializes_without_unset_options() {
        let out = toml::to_string(&HeraldConfig::default()).unwrap();
        assert!(out.contains("name = \"herald\""));
        assert!(!out.contains("alias"));
    }
}
