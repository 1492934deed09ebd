use std::path::PathBuf;

use clap::Parser;
use mtc_adapter::source::mock::MockMachine;
use mtc_adapter::source::{MachineSource, pump};
use mtc_adapter::{AdapterOptions, AdapterRuntime, Config, ShdrAdapter};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "mtc-adapter")]
#[command(about = "SHDR adapter serving MTConnect agents")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "mtc-adapter.toml")]
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

    let adapter = ShdrAdapter::new(AdapterOptions::from(&config));
    let runtime =
        AdapterRuntime::start(adapter.clone(), config.server.addr, config.adapter.interval())
            .await?;
    info!(addr = %runtime.local_addr(), mode = ?config.adapter.mode, "SHDR adapter listening");

    let source_cancel = CancellationToken::new();
    if config.source.enabled {
        let machine = MockMachine::from_config(&config.source);
        let rx = machine.start(source_cancel.clone()).await?;
        tokio::spawn(pump(adapter, rx));
    }

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    source_cancel.cancel();
    runtime.stop().await;

    Ok(())
}
