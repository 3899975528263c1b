//! NRF impact assessment worker.
//!
//! Usage:
//!     nrf-worker --queue-db queue.db --reference-db reference.db \
//!         --input-root ./inputs --output-dir ./results

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use nrf_logging::{init_logging, LogConfig};
use nrf_reference::SqliteReferenceStore;
use nrf_worker::{
    FileResultSink, IntakeLoop, LocalInputStore, Pipeline, ShutdownOutcome, SqliteJobQueue,
    WorkerArgs,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = WorkerArgs::parse();

    init_logging(LogConfig {
        app_name: "nrf-worker",
        verbose: args.verbose,
        json: args.log_json,
        log_dir: args.log_dir.clone(),
    })?;

    let settings = args.settings().context("Invalid worker configuration")?;

    let queue = SqliteJobQueue::open(&args.queue_db, args.max_receive_count)
        .await
        .with_context(|| format!("Failed to open job queue {}", args.queue_db.display()))?;
    let store = SqliteReferenceStore::open(&args.reference_db, args.reference_max_connections)
        .await
        .with_context(|| {
            format!(
                "Failed to open reference store {}",
                args.reference_db.display()
            )
        })?;
    std::fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            args.output_dir.display()
        )
    })?;

    let pipeline = Pipeline::new(
        Arc::new(LocalInputStore::new(&args.input_root)),
        Arc::new(store),
        Arc::new(FileResultSink::new(&args.output_dir)),
        settings.assessment.clone(),
        settings.target_crs,
    );

    info!("Starting NRF impact worker");
    info!("  Queue: {}", args.queue_db.display());
    info!("  Reference store: {}", args.reference_db.display());
    info!("  Inputs: {}", args.input_root.display());
    info!("  Results: {}", args.output_dir.display());
    info!("  Target CRS: {}", settings.target_crs);
    info!(
        "  Regression tolerance: relative {}, absolute {}",
        settings.tolerance.relative, settings.tolerance.absolute
    );

    let handle = IntakeLoop::new(Arc::new(queue), Arc::new(pipeline), settings.intake.clone())
        .with_heartbeat(args.heartbeat_file.clone())
        .spawn();

    wait_for_signal().await?;

    match handle.shutdown().await {
        ShutdownOutcome::Graceful => info!("Worker stopped"),
        ShutdownOutcome::Aborted => info!("Worker stopped after aborting the in-flight job"),
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    info!("Shutdown signal received");
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown signal received");
    Ok(())
}
