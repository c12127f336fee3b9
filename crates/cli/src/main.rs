mod config_commands;
mod scripts;
mod shell;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    herald_config::HeraldConfig,
    herald_robot::{Brain, BrainEvent, Robot},
    tokio::sync::broadcast::{self, error::RecvError},
    tracing::{debug, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::{config_commands::ConfigAction, shell::ShellAdapter};

#[derive(Parser)]
#[command(name = "herald", version, about = "Herald, a chat robot with middleware")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level or filter directive (overrides config `logging.level`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of the discovered one.
    #[arg(long, global = true, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,

    /// Robot name (overrides config and `HERALD_NAME`).
    #[arg(long, global = true)]
    name: Option<String>,

    /// Robot alias (overrides config and `HERALD_ALIAS`).
    #[arg(long, global = true)]
    alias: Option<String>,

    /// Print collected metrics to stderr on exit.
    #[cfg(feature = "metrics")]
    #[arg(long, global = true, default_value_t = false)]
    print_metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the robot on stdin/stdout (default when no subcommand is provided).
    Run,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Resolve the config: file (explicit or discovered), then `HERALD_*`, then
/// command-line flags.
fn resolve_config(cli: &Cli) -> anyhow::Result<HeraldConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = herald_config::load_config(path)?;
            herald_config::apply_env_overrides(&mut config);
            config
        },
        None => herald_config::discover_and_load(),
    };
    if let Some(name) = &cli.name {
        config.robot.name.clone_from(name);
    }
    if let Some(alias) = &cli.alias {
        config.robot.alias = Some(alias.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    config.logging.json |= cli.json_logs;
    Ok(config)
}

/// `RUST_LOG` wins over the configured level.
fn init_telemetry(config: &HeraldConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout belongs to the shell adapter.
    if config.logging.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn start_brain(config: &HeraldConfig) -> Brain {
    let brain = Brain::new();
    tokio::spawn(log_brain_events(brain.subscribe()));
    brain.set_auto_save(config.brain.auto_save);
    if config.brain.auto_save && config.brain.save_interval_secs > 0 {
        brain.start_auto_save(config.brain.save_interval());
    }
    brain
}

/// Nothing is persisted; saves are only traced.
async fn log_brain_events(mut events: broadcast::Receiver<BrainEvent>) {
    loop {
        match events.recv().await {
            Ok(BrainEvent::Loaded(data)) => debug!(keys = data.private.len(), "brain loaded"),
            Ok(BrainEvent::Save(data)) => debug!(users = data.users.len(), "brain save"),
            Ok(BrainEvent::Close) | Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "brain event log lagged"),
        }
    }
}

async fn run(config: &HeraldConfig, print_metrics: bool) -> anyhow::Result<()> {
    #[cfg(feature = "metrics")]
    let metrics = herald_metrics::init_metrics(herald_metrics::MetricsRecorderConfig {
        enabled: true,
        global_labels: vec![("robot".into(), config.robot.name.clone())],
    })?;

    let mut builder = Robot::builder(config.robot.name.clone());
    if let Some(alias) = &config.robot.alias {
        builder.alias(alias.clone());
    }
    builder
        .shared_adapter(Arc::new(ShellAdapter::stdio()))
        .brain(start_brain(config));
    scripts::register(&mut builder)?;
    let robot = builder.build()?;

    let result = robot.run().await;

    #[cfg(feature = "metrics")]
    if print_metrics {
        eprint!("{}", metrics.render());
    }
    #[cfg(not(feature = "metrics"))]
    if print_metrics {
        warn!("built without metrics support");
    }

    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = resolve_config(&cli)?;
    init_telemetry(&config);

    #[cfg(feature = "metrics")]
    let print_metrics = cli.print_metrics;
    #[cfg(not(feature = "metrics"))]
    let print_metrics = false;

    info!(version = env!("CARGO_PKG_VERSION"), "herald starting");

    match cli.command {
        None | Some(Commands::Run) => run(&config, print_metrics).await,
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, cli.config.as_deref(), &config)
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "herald",
            "--name",
            "hubert",
            "--alias",
            "/",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.robot.name, "hubert");
        assert_eq!(config.robot.alias.as_deref(), Some("/"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.yaml");
        std::fs::write(&path, "robot:\n  name: yamlbot\nbrain:\n  auto_save: false\n").unwrap();
        let cli = Cli::parse_from(["herald", "--config", path.to_str().unwrap(), "config", "show"]);
        let config = resolve_config(&cli).unwrap();
        assert!(!config.brain.auto_save);
        assert!(matches!(cli.command, Some(Commands::Config {
            action: ConfigAction::Show
        })));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
