//! World Avatar MCP - entry point
//!
//! Supervises a world server, connects an avatar to it and serves the
//! avatar's tools over MCP on stdio.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use world_avatar_mcp::{orchestrator::Orchestrator, Config, ConfigError};

const DEFAULT_SERVER_PATH: &str = "./minecraft-server/server.jar";

#[derive(Parser, Debug)]
#[command(name = "world-avatar-mcp")]
#[command(about = "MCP server driving an avatar inside a supervised world server")]
struct Args {
    /// World server jar or launch script [default: ./minecraft-server/server.jar]
    #[arg(short = 'j', long, env = "WORLD_SERVER_PATH")]
    server_jar: Option<PathBuf>,

    /// YAML config file (defaults to ./config.yaml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    // stdout carries the protocol, so console logs go to stderr
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,world_avatar_mcp=debug".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let yaml = args.config.as_deref();
    match Config::from_yaml_and_env(yaml, args.server_jar.as_deref()) {
        Err(ConfigError::MissingProcessPath) => {
            Ok(Config::from_yaml_and_env(yaml, Some(Path::new(DEFAULT_SERVER_PATH)))?)
        }
        other => Ok(other?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(args.log_file.as_deref())?;

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        path = %config.server.process_path.display(),
        port = config.server.port,
        username = %config.session.username,
        "Starting world avatar MCP server"
    );

    let code = Orchestrator::new(config).run().await;

    // A pending stdin read would otherwise keep the runtime from shutting down
    std::process::exit(code);
}
