use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{HttpProvisioningClient, SessionController, WebSocketConnector};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod sink;

use config::load_settings;
use sink::SinkFormat;

/// Keeps a control channel to the orchestrator and provisions a simulation
/// instance when one is requested.
#[derive(Parser, Debug)]
struct Args {
    /// Display name announced to the orchestrator.
    #[arg(long)]
    identity: Option<String>,
    /// Orchestrator host or IP address.
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long, default_value = "agent.toml")]
    config: PathBuf,
    /// Print events as JSON lines instead of log lines.
    #[arg(long)]
    json_events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config)?;
    if let Some(identity) = args.identity {
        settings.identity = Some(identity);
    }
    if let Some(endpoint) = args.endpoint {
        settings.endpoint = Some(endpoint);
    }
    let identity = settings
        .identity
        .clone()
        .context("an identity is required (--identity or AGENT__IDENTITY)")?;
    let endpoint = settings
        .endpoint
        .clone()
        .context("an orchestrator endpoint is required (--endpoint or AGENT__ENDPOINT)")?;

    let config = settings.controller_config();
    let connector = Arc::new(WebSocketConnector::new(config.connect_timeout));
    let backend = Arc::new(HttpProvisioningClient::new(
        config.backend_url.clone(),
        config.provisioning_timeout,
    ));
    let controller = SessionController::new(config, connector, backend);
    let format = if args.json_events {
        SinkFormat::Json
    } else {
        SinkFormat::Text
    };
    let sink = tokio::spawn(sink::run(controller.subscribe_events(), format));

    controller
        .open(&identity, &endpoint)
        .await
        .context("failed to open session")?;
    info!(%identity, %endpoint, "agent started; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("agent shutting down");
    controller.close().await;
    sink.abort();
    Ok(())
}
