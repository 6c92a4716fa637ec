//! Render worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use vedit_queue::RedisQueue;
use vedit_worker::{init_metrics, init_tracing, MediaJobRunner, WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vedit-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        init_metrics(addr).context("failed to install Prometheus exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let queue = RedisQueue::from_env().context("failed to create job queue")?;
    queue.init().await.context("failed to initialize job queue")?;
    info!(
        "Consuming {} as {}",
        queue.config().stream_name,
        queue.config().consumer_name
    );

    let runner = MediaJobRunner::from_config(&config).context("failed to set up media runner")?;
    let pool = Arc::new(WorkerPool::new(config, Arc::new(queue), Arc::new(runner)));

    let signal_pool = Arc::clone(&pool);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal");
        signal_pool.shutdown();
    });

    pool.run().await.context("worker pool stopped with an error")?;

    info!("Worker shutdown complete");
    Ok(())
}
