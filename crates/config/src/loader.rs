use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::HeraldConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["herald.toml", "herald.yaml", "herald.yml", "herald.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<HeraldConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations, then apply `HERALD_*`
/// overrides.
///
/// Search order:
/// 1. `./herald.{toml,yaml,yml,json}` (project-local)
/// 2. `<user config dir>/herald.{toml,yaml,yml,json}` (user-global)
///
/// Never fails: a missing or broken file yields the defaults.
pub fn discover_and_load() -> HeraldConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                HeraldConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            HeraldConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/herald/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "herald").map(|d| d.config_dir().to_path_buf())
}

/// Apply `HERALD_NAME`, `HERALD_ALIAS` and `HERALD_LOG_LEVEL`.
pub fn apply_env_overrides(config: &mut HeraldConfig) {
    apply_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_overrides_with(config: &mut HeraldConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(name) = lookup("HERALD_NAME").filter(|v| !v.is_empty()) {
        config.robot.name = name;
    }
    if let Some(alias) = lookup("HERALD_ALIAS") {
        config.robot.alias = (!alias.is_empty()).then_some(alias);
    }
    if let Some(level) = lookup("HERALD_LOG_LEVEL").filter(|v| !v.is_empty()) {
        config.logging.level = level;
    }
}

/// Serialize `config` to TOML at `path`, creating parent directories.
pub fn save_config(config: &HeraldConfig, path: &Path) -> Result<()> {
    let write_err = |source: std::io::Error| Error::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let toml_str = toml::to_string_pretty(config).map_err(|e| Error::Serialize {
        message: e.to_string(),
    })?;
    std::fs::write(path, toml_str).map_err(write_err)?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

/// File format, chosen by extension. Anything unrecognised is an error;
/// no extension means TOML.
pub(crate) fn format_of(path: &Path) -> Result<&'static str> {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("toml") {
        "toml" => Ok("toml"),
        "yaml" | "yml" => Ok("yaml"),
        "json" => Ok("json"),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}

/// Parse `raw` into a generic JSON tree, whatever its format.
pub(crate) fn parse_value(raw: &str, path: &Path) -> Result<serde_json::Value> {
    let format = format_of(path)?;
    let parsed = match format {
        "toml" => toml::from_str::<toml::Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|v| serde_json::to_value(v).map_err(|e| e.to_string())),
        "yaml" => serde_yaml::from_str::<serde_json::Value>(raw).map_err(|e| e.to_string()),
        _ => serde_json::from_str::<serde_json::Value>(raw).map_err(|e| e.to_string()),
    };
    // An empty YAML document parses as null.
    match parsed {
        Ok(serde_json::Value::Null) => Ok(serde_json::Value::Object(serde_json::Map::new())),
        Ok(value) => Ok(value),
        Err(message) => Err(Error::parse(path, format, message)),
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<HeraldConfig> {
    let value = parse_value(raw, path)?;
    serde_json::from_value(value).map_err(|e| Error::parse(path, format_of(path).unwrap_or("toml"), e))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[rstest]
    #[case("herald.toml", "[robot]\nname = \"hubert\"\nalias = \"/\"\n")]
    #[case("herald.yaml", "robot:\n  name: hubert\n  alias: /\n")]
    #[case("herald.json", r#"{"robot": {"name": "hubert", "alias": "/"}}"#)]
    fn loads_every_format(#[case] name: &str, #[case] body: &str) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&write(&dir, name, body)).unwrap();
        assert_eq!(cfg.robot.name, "hubert");
        assert_eq!(cfg.robot.alias.as_deref(), Some("/"));
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn empty_yaml_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&write(&dir, "herald.yml", "")).unwrap();
        assert_eq!(cfg, HeraldConfig::default());
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&write(&dir, "herald.ini", "name=x")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "herald.toml", "[robot\nname=");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("herald.toml"));
        assert!(matches!(err, Error::Parse { format: "toml", .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_config(Path::new("/nonexistent/herald.toml")).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("herald.toml");
        let mut cfg = HeraldConfig::default();
        cfg.robot.alias = Some("!".into());
        cfg.brain.save_interval_secs = 30;
        save_config(&cfg, &path).unwrap();
        assert_eq!(load_config(&path).unwrap(), cfg);
    }

    #[test]
    fn env_overrides_win() {
        let env = HashMap::from([
            ("HERALD_NAME", "override"),
            ("HERALD_ALIAS", ""),
            ("HERALD_LOG_LEVEL", "debug"),
        ]);
        let mut cfg = HeraldConfig::default();
        cfg.robot.alias = Some("/".into());
        apply_overrides_with(&mut cfg, |name| env.get(name).map(|v| v.to_string()));
        assert_eq!(cfg.robot.name, "override");
        assert_eq!(cfg.robot.alias, None);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn unset_overrides_change_nothing() {
        let mut cfg = HeraldConfig::default();
        apply_overrides_with(&mut cfg, |_| None);
        assert_eq!(cfg, HeraldConfig::default());
    }
}
