//! Main application entry point
//!
//! Serves video playback and query commands as JSON lines on stdin and
//! stdout. Logs go to stderr.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vv_data::config::split_providers;
use vv_data::ServiceConfig;

mod dispatch;
mod presenter;
mod server;

use server::{command_table, ServerState};

#[derive(Parser, Debug)]
#[command(name = "visgui", version, about = "Video playback and query result review service")]
struct Args {
    /// Log debugging messages
    #[arg(short, long)]
    debug: bool,

    /// JSON configuration file
    #[arg(short, long, env = "VISGUI_CONFIG")]
    config: Option<PathBuf>,

    /// Clip provider indexes, separated by ';'
    #[arg(long)]
    providers: Option<String>,

    /// Query service endpoint
    #[arg(long)]
    query_url: Option<String>,

    /// Stream opened when a player is given none
    #[arg(long)]
    stream_id: Option<String>,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// File, then environment, then command line
fn load_config(args: &Args) -> Result<ServiceConfig> {
    let mut config = match &args.config {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration '{}'", path.display()))?,
        None => ServiceConfig::default(),
    };
    config.apply_env();

    if let Some(providers) = &args.providers {
        config.video_providers = split_providers(providers);
    }
    if let Some(url) = &args.query_url {
        config.query_url = Some(url.clone());
    }
    if let Some(stream) = &args.stream_id {
        config.stream_id = Some(stream.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn write_line(stdout: &mut tokio::io::Stdout, message: &Value) -> Result<()> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let config = load_config(&args)?;
    let tick_interval = Duration::from_millis(config.tick_interval_ms.max(1));
    info!(
        providers = config.video_providers.len(),
        query_url = config.query_url.as_deref().unwrap_or(""),
        "Starting VisGUI service"
    );

    let (event_tx, mut event_rx) = vv_query::event_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
    let mut state = ServerState::new(config, event_tx, out_tx.clone());
    let table = command_table();
    debug!(commands = table.commands().count(), "Registered commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read command")? {
                    Some(line) => {
                        if let Some(response) = table.handle_line(&mut state, &line) {
                            let _ = out_tx.send(serde_json::to_value(response)?);
                        }
                    }
                    None => {
                        info!("Input closed");
                        break;
                    }
                }
            }
            Some(event) = event_rx.recv() => state.handle_transport_event(event),
            Some(message) = out_rx.recv() => write_line(&mut stdout, &message).await?,
            _ = ticker.tick() => state.tick(),
        }
    }

    state.shut_down();
    while let Ok(message) = out_rx.try_recv() {
        if let Err(e) = write_line(&mut stdout, &message).await {
            warn!(error = %e, "Dropping output at shutdown");
            break;
        }
    }
    info!("VisGUI service stopped");
    Ok(())
}
