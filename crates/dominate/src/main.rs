//! # dominate
//!
//! Realtime hub server binary: loads settings, initializes logging and
//! metrics, serves the hub and shuts down gracefully on Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dominate_core::logging::{LogFormat, init_subscriber};
use dominate_server::{DominateServer, ServerConfig};
use dominate_settings::{DominateSettings, LogLevel};

/// Dominate realtime hub server.
#[derive(Parser, Debug)]
#[command(name = "dominate", version, about = "Realtime event hub for Dominate")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.dominate/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level: trace, debug, info, warn or error (overrides settings).
    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// Do not install the Prometheus recorder.
    #[arg(long)]
    no_metrics: bool,
}

fn parse_log_level(raw: &str) -> std::result::Result<LogLevel, String> {
    LogLevel::parse(raw).ok_or_else(|| format!("unknown log level `{raw}`"))
}

/// Load settings and layer CLI flags on top.
fn resolve_settings(cli: &Cli) -> Result<DominateSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(dominate_settings::settings_path);
    let mut settings = dominate_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    if cli.json_logs {
        settings.logging.json = true;
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(settings.logging.level.as_filter_str(), format);

    let mut server = DominateServer::new(ServerConfig::from_settings(&settings));
    if !cli.no_metrics {
        match dominate_server::metrics::install_recorder() {
            Ok(handle) => server = server.with_metrics(handle),
            Err(e) => tracing::warn!(error = %e, "metrics disabled"),
        }
    }

    let addr = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        version = dominate_core::constants::VERSION,
        mailbox_capacity = settings.hub.mailbox_capacity,
        "{} listening on http://{addr}",
        settings.name
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.shutdown().await {
        tracing::warn!("shutdown did not finish within the timeout");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
