use std::path::Path;

use {
    anyhow::{Context, Result, bail},
    clap::Subcommand,
    herald_config::{HeraldConfig, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration (file, env overrides and flags).
    Show,
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// `path` is the `--config` flag; `effective` the already-resolved config.
pub fn handle_config(
    action: ConfigAction,
    path: Option<&Path>,
    effective: &HeraldConfig,
) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(path, verbose),
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(effective)?);
            Ok(())
        },
        ConfigAction::Init { force } => init(path, force),
    }
}

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = herald_config::validate(path);

    match result.config_path {
        Some(ref path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking defaults.\n"),
    }

    let mut shown = 0;
    for d in result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
    {
        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
        };
        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message);
        } else {
            eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
        }
        shown += 1;
    }
    if shown > 0 {
        eprintln!();
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn init(path: Option<&Path>, force: bool) -> Result<()> {
    let target = match path {
        Some(path) => path.to_path_buf(),
        None => herald_config::config_dir()
            .context("could not determine the user config directory")?
            .join("herald.toml"),
    };
    write_default(&target, force)?;
    eprintln!("Wrote {}", target.display());
    Ok(())
}

fn write_default(target: &Path, force: bool) -> Result<()> {
    if target.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", target.display());
    }
    herald_config::save_config(&HeraldConfig::default(), target)?;
    Ok(())
}
