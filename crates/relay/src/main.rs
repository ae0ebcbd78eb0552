// cuelink-relay: standalone relay server entry point.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use cuelink_relay::{
    config::RelayConfig,
    metrics::{set_global_metrics, RelayMetrics},
    server,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "cuelink-relay", about = "Session relay for cuelink players and remotes")]
struct Args {
    /// Listen address; overrides CUELINK_RELAY_HOST / CUELINK_RELAY_PORT.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log filter directive; overrides CUELINK_RELAY_LOG_FILTER.
    #[arg(long)]
    log_filter: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Keep sessions around after their last device leaves.
    #[arg(long)]
    keep_empty_sessions: bool,
}

impl Args {
    fn apply(&self, mut config: RelayConfig) -> RelayConfig {
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(filter) = &self.log_filter {
            config.log_filter = filter.clone();
        }
        if self.keep_empty_sessions {
            config.remove_empty_sessions = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.apply(RelayConfig::from_env());

    init_tracing(&config.log_filter, args.log_format)?;
    set_global_metrics(Arc::new(RelayMetrics::default()));

    info!(listen_addr = %config.listen_addr, "starting cuelink relay");
    server::serve(&config, shutdown_signal()).await
}

fn init_tracing(filter: &str, format: LogFormat) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_new(filter).with_context(|| format!("invalid log filter `{filter}`"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|error| anyhow::anyhow!(error))
    .context("failed to install tracing subscriber")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
