use clap::Parser;
use std::sync::Arc;
use taskmill_scheduler::{serve, MemoryScheduler, SchedulerConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tm-scheduler")]
#[command(about = "In-memory taskmill scheduler", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "scheduler.yaml")]
    config: String,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = if std::path::Path::new(&args.config).exists() {
        SchedulerConfig::from_file(&args.config)?
    } else {
        tracing::warn!("Config file not found, using defaults");
        SchedulerConfig::default()
    };

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing::info!("Starting scheduler with config: {:?}", config);

    let listener = TcpListener::bind(config.bind_address()).await?;
    let scheduler = MemoryScheduler::new(config);
    let shutdown = CancellationToken::new();
    let sweeper = scheduler.spawn_sweeper(shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        signal.cancel();
    });

    serve(listener, Arc::new(scheduler), shutdown).await?;
    sweeper.await?;

    Ok(())
}
