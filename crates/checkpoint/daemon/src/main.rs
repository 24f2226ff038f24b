//! checkpointd - gate event correlation daemon
//!
//! Loads configuration, initialises logging, opens the configured backends
//! and drives the correlation engine:
//! - `replay` feeds a recorded NDJSON sensor stream through the engine
//! - `check-config` prints the effective configuration

use anyhow::Context;
use checkpoint_daemon::{CheckpointNode, DaemonConfig};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Checkpoint daemon CLI
#[derive(Parser)]
#[command(name = "checkpointd")]
#[command(about = "Gate event correlation and permit lifecycle daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CHECKPOINT_CONFIG")]
    config: Option<String>,

    /// Log level, overrides logging.level
    #[arg(long, env = "CHECKPOINT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "CHECKPOINT_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay an NDJSON sensor stream and print the resulting permits
    Replay {
        /// Stream file, `-` for stdin
        file: PathBuf,
    },

    /// Print the effective configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = DaemonConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Command::CheckConfig => {
            config
                .validate()
                .map_err(anyhow::Error::msg)
                .context("invalid configuration")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Replay { file } => replay(&config, &file).await,
    }
}

async fn replay(config: &DaemonConfig, file: &Path) -> anyhow::Result<()> {
    let node = CheckpointNode::start(config)
        .await
        .context("failed to start checkpoint node")?;

    let run = async {
        let summary = if file.as_os_str() == "-" {
            node.replay(BufReader::new(tokio::io::stdin())).await?
        } else {
            let handle = tokio::fs::File::open(file)
                .await
                .with_context(|| format!("failed to open {}", file.display()))?;
            node.replay(BufReader::new(handle)).await?
        };
        Ok::<_, anyhow::Error>(summary)
    };

    let summary = tokio::select! {
        summary = run => summary?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, draining in-flight resolutions");
            node.shutdown().await;
            anyhow::bail!("replay interrupted");
        }
    };

    node.shutdown().await;

    let permits = node.permits().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "summary": summary,
            "permits": permits,
        }))?
    );
    Ok(())
}
