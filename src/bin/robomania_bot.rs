//! Robomania bot entry point.

use anyhow::Context;
use clap::Parser;
use robomania::BotConfig;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Discord bot for the robotics team web panel.
#[derive(Parser)]
#[command(name = "robomania-bot", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "ROBOMANIA_CONFIG")]
    config: Option<PathBuf>,

    /// Dotenv file with secrets, loaded when present.
    #[arg(long, default_value = "TOKEN.env")]
    env_file: PathBuf,

    /// Write the effective configuration (secrets included) to this path and exit.
    #[arg(long)]
    write_config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let dotenv_loaded = dotenvy::from_path(&cli.env_file).is_ok();
    let config = load_config(cli.config.as_deref())?;
    if let Some(path) = &cli.write_config {
        config
            .save_to_file(path)
            .with_context(|| format!("writing config to {}", path.display()))?;
        println!("Wrote {}", path.display());
        return Ok(());
    }
    config.validate().context("incomplete configuration")?;

    let _log_guard = init_tracing(&config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        dotenv_loaded,
        "robomania-bot starting"
    );

    // Single-threaded: the bot is I/O bound and every component is an actor or a task.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(async {
        let shutdown = CancellationToken::new();
        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received Ctrl+C, shutting down...");
                on_signal.cancel();
            }
        });
        robomania::app::run(config, shutdown).await
    })?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BotConfig> {
    let mut config = match path {
        Some(path) => BotConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let default = BotConfig::default_config_path();
            if default.exists() {
                BotConfig::from_file(&default)
                    .with_context(|| format!("loading config from {}", default.display()))?
            } else {
                BotConfig::default()
            }
        }
    };
    config.apply_env_overrides()?;
    Ok(config)
}

/// Stderr output, plus a daily-rolling file when `logging.log_dir` is set.
fn init_tracing(config: &BotConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = &config.logging.log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr)
            .try_init()
            .context("installing log subscriber")?;
        return Ok(None);
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "robomania.log"));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .context("installing log subscriber")?;
    Ok(Some(guard))
}
