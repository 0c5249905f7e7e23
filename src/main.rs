use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sensorlog::{app, Settings};

#[derive(Parser, Debug)]
#[command(name = "sensorlog")]
#[command(about = "Log MQTT sensor readings to InfluxDB with noise filtering and liveness tracking")]
struct Args {
    /// Settings file (TOML). Environment variables prefixed SENSORLOG_ override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log emissions instead of writing them to InfluxDB
    #[arg(long)]
    dry_run: bool,

    /// Load settings and the measurement config, print a summary and exit
    #[arg(long, conflicts_with = "dry_run")]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log.level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = app::load_registry(&settings)?;

    if args.check {
        println!("{}", app::summary(&settings, &registry));
        return Ok(());
    }

    let sink = app::connect_sink(&settings, args.dry_run).await?;

    app::run(&settings, registry, sink, app::shutdown_signal()).await
}
