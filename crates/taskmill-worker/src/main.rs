use clap::Parser;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskmill_core::TaskResult;
use taskmill_protocol::TcpScheduler;
use taskmill_worker::handler::EchoHandler;
use taskmill_worker::{Worker, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tm-worker")]
#[command(about = "Taskmill worker", long_about = None)]
struct Args {
    /// Scheduler address
    #[arg(short, long)]
    scheduler: Option<String>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Concurrent tasks per task type
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,
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

    let mut config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    if let Some(scheduler) = args.scheduler {
        config.scheduler_address = scheduler;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = Some(worker_id);
    }

    let scheduler = TcpScheduler::new(config.scheduler_address.clone())
        .with_long_poll_timeout(config.long_poll_timeout());
    let worker = Worker::new(config, Arc::new(scheduler));

    worker.register_simple("echo", EchoHandler);

    // Counts to 100 over ten seconds, reporting progress through the heartbeat
    worker.register_fn("sleep", |ctx| async move {
        let progress = Arc::new(AtomicI32::new(0));
        let reported = progress.clone();
        ctx.set_progress_provider(move || reported.load(Ordering::Relaxed));

        for step in 1..=10 {
            tokio::select! {
                _ = ctx.abort_signal() => return TaskResult::non_retryable(anyhow::anyhow!("aborted")),
                _ = ctx.scope().cancelled() => return TaskResult::retryable(anyhow::anyhow!("worker shutting down")),
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
            progress.store(step * 10, Ordering::Relaxed);
        }
        TaskResult::success_json(&serde_json::json!({ "slept_secs": 10 }))
    });

    tracing::info!(
        worker_id = %worker.worker_id(),
        "Registered task types: {:?}",
        worker.task_types()
    );

    worker.start()?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");
    worker.stop().await;

    Ok(())
}
