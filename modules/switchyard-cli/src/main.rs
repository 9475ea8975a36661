use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use switchyard_engine::{
    serve_listeners, serve_navigation, subscribe_listeners, ChannelRedirect, Dispatcher,
};

mod commands;
mod file_config;
mod handlers;

#[derive(Parser)]
#[command(name = "switchyard", about = "Run an event dispatcher from a TOML sequence table")]
struct Cli {
    /// Path to dispatcher TOML file
    #[arg(long, env = "SWITCHYARD_CONFIG", default_value = "./switchyard.toml")]
    config: PathBuf,

    /// Turn on validation, dispatch logging, and history
    #[arg(long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command results
    let logs = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("switchyard=info".parse()?));
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    info!(config = %cli.config.display(), "Loading dispatcher config");
    let definition = file_config::load_config(&cli.config)?;

    let mut config = definition.dispatcher_config()?;
    config.debug |= cli.debug;

    let (redirect, navigations) = ChannelRedirect::new();
    let dispatcher = definition
        .apply(Dispatcher::builder())?
        .config(config)
        .redirect(Arc::new(redirect))
        .build(definition.initial_store()?)
        .context("Invalid sequence table")?;
    let dispatcher = Arc::new(dispatcher);

    let updates = subscribe_listeners(&dispatcher);
    tokio::spawn(serve_listeners(dispatcher.clone(), updates));
    tokio::spawn(serve_navigation(dispatcher.clone(), navigations));

    info!("Reading commands from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match commands::parse_command(line) {
            Ok(command) => commands::run_command(&dispatcher, command)
                .await
                .unwrap_or_else(|e| json!({ "error": format!("{e:#}") })),
            Err(e) => json!({ "error": format!("invalid command: {e:#}") }),
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    info!("Stdin closed, shutting down");
    Ok(())
}
