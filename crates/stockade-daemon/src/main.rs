//! stockade-daemon - sandboxed execution orchestrator
//!
//! Accepts jobs over HTTP, runs each one in an isolated, resource-bounded
//! execution unit on a fixed-size worker pool and serves the verdicts.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::sync::Arc;
use stockade_core::Sandbox;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod journal;
mod pool;
mod queue;
mod server;

use config::{CliArgs, DaemonConfig};
use journal::Journal;
use pool::Scheduler;
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("stockade=info".parse()?))
        .init();
    set_panic_hook();

    let cli = CliArgs::parse();
    let config = DaemonConfig::load(&cli).context("invalid configuration")?;
    tracing::info!(
        listen = %config.listen,
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        scratch_root = %config.sandbox.scratch_root.display(),
        "configuration loaded"
    );

    let sandbox = Sandbox::new(config.sandbox.clone(), config.languages.clone())
        .context("sandbox unavailable")?;
    let isolation = sandbox.support();
    tracing::info!(?isolation, effective = ?sandbox.isolation(), "isolation probed");

    let reaped = sandbox.reap_orphans().context("failed to reap orphaned units")?;
    if reaped > 0 {
        tracing::info!(count = reaped, "reaped orphaned units");
    }

    let journal = Journal::open(&config.state_dir).context("state directory unusable")?;
    let records = journal.load().context("failed to read journal")?;
    tracing::info!(
        state_dir = %journal.dir().display(),
        records = records.len(),
        "journal loaded"
    );

    let scheduler = Arc::new(Scheduler::start(&config, Arc::new(sandbox), Some(journal)));
    let interrupted = scheduler.recover(records);
    if interrupted > 0 {
        tracing::warn!(count = interrupted, "jobs interrupted by the previous run");
    }

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(address = %config.listen, "listening");

    let app = server::router(AppState {
        scheduler: Arc::clone(&scheduler),
        isolation,
    });
    let signals = Signals::new([SIGTERM, SIGINT]).context("failed to install signal handlers")?;
    let handle = signals.handle();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(signals))
        .await?;

    scheduler.shutdown(config.shutdown_grace()).await;
    handle.close();
    tracing::info!("stockade-daemon stopped");

    Ok(())
}

async fn shutdown_signal(mut signals: Signals) {
    if let Some(signal) = signals.next().await {
        tracing::info!(signal, "shutdown requested");
    }
}

fn set_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!(message = "panic occurred", panic = %panic_info);
    }));
}
