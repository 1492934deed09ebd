use std::path::PathBuf;

use clap::Parser;
use mtc_agent::{AdapterClient, ClientEvent, ClientSettings, Config, InMemoryAgent};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "mtc-agent")]
#[command(about = "MTConnect agent receiving SHDR from adapters")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "mtc-agent.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    if config.adapters.is_empty() {
        warn!("No adapters configured");
    }

    let agent = InMemoryAgent::new(config.devices.clone());
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    for adapter in &config.adapters {
        let client = AdapterClient::new(ClientSettings::from(adapter), agent.clone());
        info!(addr = %client.settings().addr, device = %adapter.device, "Starting adapter client");

        tracker.spawn(log_events(client.subscribe(), cancel.clone()));
        let cancel = cancel.clone();
        tracker.spawn(async move { client.run(cancel).await });
    }
    tracker.close();

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    cancel.cancel();
    tracker.wait().await;

    info!(
        observations = agent.observations().await.len(),
        assets = agent.asset_count().await,
        "Agent stopped"
    );

    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<ClientEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(ClientEvent::InvalidObservation { device, key }) => {
                debug!(%device, %key, "invalid observation")
            }
            Ok(event) => debug!(?event, "adapter client event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "adapter client events dropped")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
