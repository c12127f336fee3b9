//! Configuration validation.
//!
//! Reports syntax errors, unknown (likely misspelled) fields, type errors and
//! settings that parse but cannot work.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::{env_subst::substitute_env, loader, schema::HeraldConfig};

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace", "off"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        })
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error" or "semantic".
    pub category: &'static str,
    /// Dotted path, e.g. "robot.nmae".
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{}: {}: {}", self.severity, self.path, self.message)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Expected shape of the config tree.
enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

fn schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    Struct(HashMap::from([
        (
            "robot",
            Struct(HashMap::from([
                ("name", Leaf),
                ("alias", Leaf),
                ("team_id", Leaf),
            ])),
        ),
        ("logging", Struct(HashMap::from([("level", Leaf), ("json", Leaf)]))),
        (
            "brain",
            Struct(HashMap::from([
                ("auto_save", Leaf),
                ("save_interval_secs", Leaf),
            ])),
        ),
    ]))
}

/// Validate the file at `path`, or the discovered config file when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let Some(path) = path.map(Path::to_path_buf).or_else(loader::find_config_file) else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "syntax",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&path) {
        Ok(raw) => validate_str(&raw, &path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(path);
    result
}

/// Validate raw config text; `path` only selects the format.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value = match loader::parse_value(&substitute_env(raw), path) {
        Ok(value) => value,
        Err(e) => {
            diagnostics.push(Diagnostic::new(Severity::Error, "syntax", "", e.to_string()));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &schema_map(), "", &mut diagnostics);

    match serde_json::from_value::<HeraldConfig>(value) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (Value::Object(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known: Vec<&str> = fields.keys().copied().collect();
    for (key, child) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => check_unknown_fields(child, child_schema, &path, diagnostics),
            None => {
                let message = match suggest(key, &known, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic::new(Severity::Error, "unknown-field", path, message));
            },
        }
    }
}

fn check_semantics(config: &HeraldConfig, diagnostics: &mut Vec<Diagnostic>) {
    let name = config.robot.name.trim();
    if name.is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "robot.name",
            "robot name must not be empty",
        ));
    }

    if let Some(alias) = &config.robot.alias {
        if alias.trim().is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "semantic",
                "robot.alias",
                "alias is blank; remove it instead",
            ));
        } else if alias.eq_ignore_ascii_case(name) {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "semantic",
                "robot.alias",
                "alias is the same as the robot name",
            ));
        }
    }

    // Anything else is taken as a full filter directive.
    let level = config.logging.level.to_ascii_lowercase();
    if !level.contains(['=', ',']) && !LOG_LEVELS.contains(&level.as_str()) {
        let message = match suggest(&level, LOG_LEVELS, 2) {
            Some(s) => format!("unknown log level \"{level}\" (did you mean \"{s}\"?)"),
            None => format!("unknown log level \"{level}\""),
        };
        diagnostics.push(Diagnostic::new(Severity::Warning, "semantic", "logging.level", message));
    }

    if config.brain.auto_save && config.brain.save_interval_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "semantic",
            "brain.save_interval_secs",
            "save interval must be at least 1 second while auto_save is on",
        ));
    }
}

/// Edit distance between `a` and `b`, counted in chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = (diagonal + usize::from(ca != *cb))
                .min(above + 1)
                .min(row[j] + 1);
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Closest candidate within `max_distance`, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}
