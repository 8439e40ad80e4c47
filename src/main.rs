//! # JobWatch — job stream monitor
//!
//! Polls the workload scheduler, records status transitions, raises alerts
//! and pushes live updates to WebSocket viewers.
//!
//! Usage:
//!   jobwatch                             # Run with ~/.jobwatch/config.toml
//!   jobwatch --config ./jobwatch.toml    # Explicit config file
//!   jobwatch --port 8080                 # Override gateway port
//!   jobwatch --once                      # Single poll cycle, print report, exit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jobwatch_core::JobWatchConfig;
use jobwatch_core::traits::HistorySink;
use jobwatch_gateway::{AppState, ConnectionRegistry, Subscriber};
use jobwatch_monitor::{HwaClient, Poller, SqliteHistory};

#[derive(Parser)]
#[command(
    name = "jobwatch",
    version,
    about = "JobWatch — job stream monitoring, alerting and live updates"
)]
struct Cli {
    /// Config file (default: $JOBWATCH_CONFIG or ~/.jobwatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gateway bind host
    #[arg(long)]
    host: Option<String>,

    /// Gateway port
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Run a single poll cycle, print the report as JSON and exit
    #[arg(long)]
    once: bool,
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        "jobwatch=debug,jobwatch_core=debug,jobwatch_bus=debug,jobwatch_monitor=debug,jobwatch_gateway=debug,tower_http=debug"
    } else {
        "jobwatch=info,jobwatch_core=info,jobwatch_bus=info,jobwatch_monitor=info,jobwatch_gateway=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> Result<JobWatchConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = JobWatchConfig::load_from(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.apply_env();
            config
        }
        None => JobWatchConfig::load()?,
    };
    if let Some(host) = &cli.host {
        config.gateway.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    config.validate()?;
    Ok(config)
}

fn open_history(config: &JobWatchConfig) -> Result<Option<Arc<dyn HistorySink>>> {
    if !config.history.enabled {
        tracing::info!("Status history disabled");
        return Ok(None);
    }
    let path = config.history.resolved_path();
    let db = SqliteHistory::open(&path)
        .with_context(|| format!("opening history at {}", path.display()))?;
    tracing::info!("Status history at {}", path.display());
    Ok(Some(Arc::new(db)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
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
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = load_config(&cli)?;
    let bus = jobwatch_bus::connect(&config.bus).await?;
    let history = open_history(&config)?;
    let source = Arc::new(HwaClient::new(&config.source)?);

    let mut poller = Poller::from_config(&config.monitor, source, bus.clone())?;
    if let Some(history) = &history {
        poller = poller.with_history(history.clone());
    }
    let poller = Arc::new(poller);

    if cli.once {
        let report = poller.poll_once().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let registry = Arc::new(ConnectionRegistry::from_config(&config.gateway));

    let poller_task = tokio::spawn({
        let poller = poller.clone();
        let token = shutdown.clone();
        async move { poller.run(token).await }
    });

    let subscriber = Subscriber::new(bus.clone(), registry.clone())
        .with_backoff(Duration::from_secs(config.bus.resubscribe_backoff_secs));
    let subscriber_task = tokio::spawn({
        let token = shutdown.clone();
        async move { subscriber.run(token).await }
    });

    tokio::spawn({
        let token = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutting down...");
            token.cancel();
        }
    });

    let mut state = AppState::new(registry.clone()).with_poller(poller.clone());
    if let Some(history) = history {
        state = state.with_history(history);
    }
    let served = jobwatch_gateway::start(&config.gateway, state, shutdown.clone()).await;
    // A bind failure must still stop the background loops.
    shutdown.cancel();

    if let Err(e) = poller_task.await {
        tracing::error!("Poller task failed: {e}");
    }
    if let Err(e) = subscriber_task.await {
        tracing::error!("Bus subscriber task failed: {e}");
    }
    registry.close_all().await;
    served
}
