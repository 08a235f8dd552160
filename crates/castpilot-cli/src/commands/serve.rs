//! Implementation of the `castpilot serve` command.
//!
//! Runs the scheduler loop (C6) and a pool of dispatcher workers (C7)
//! together in one process until SIGINT/SIGTERM, following the teacher's
//! `run_posting_queue_with_approval` cancellation-token shape. A
//! single-instance file lock (`fs2`) guards against two `serve` processes
//! racing the same SQLite file, matching the teacher CLI's `tick.rs`
//! process-locking pattern.

use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use tokio_util::sync::CancellationToken;

use castpilot_core::broker::sqlite::SqliteBroker;
use castpilot_core::broker::JobBroker;
use castpilot_core::config::Config;
use castpilot_core::dispatcher::Dispatcher;
use castpilot_core::scheduler::SchedulerLoop;
use castpilot_core::secrets::SecretStore;
use castpilot_core::storage;
use castpilot_core::tokens::TokenManager;

use super::ServeArgs;

pub async fn execute(config: &Config, args: ServeArgs) -> anyhow::Result<()> {
    if let Err(errors) = config.validate() {
        for error in &errors {
            tracing::error!(%error, "invalid configuration");
        }
        anyhow::bail!("configuration is invalid, see above");
    }

    let lock_path = dirs::home_dir().unwrap_or_default().join(".castpilot").join("serve.lock");
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lock_file = std::fs::OpenOptions::new().create(true).write(true).truncate(true).open(&lock_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        anyhow::bail!("another castpilot serve process is running (lock: {})", lock_path.display());
    }

    let pool = storage::init_db(&config.database_url).await?;
    let secrets = SecretStore::derive(&config.encryption_key, config.encryption_salt.as_bytes());
    let broker: Arc<dyn JobBroker> = Arc::new(SqliteBroker::new(pool.clone()));
    let tokens = Arc::new(TokenManager::new(pool.clone(), secrets));
    let config = Arc::new(config.clone());

    let cancel = CancellationToken::new();
    let tick = Duration::from_millis(config.scheduler_tick_ms);
    let scheduler = SchedulerLoop::new(pool.clone(), tick);
    let scheduler_cancel = cancel.clone();
    let scheduler_handle = tokio::spawn(scheduler.run(scheduler_cancel));

    let worker_count = args.workers.unwrap_or(config.dispatcher_concurrency).max(1);
    let dispatcher = Arc::new(Dispatcher::new(pool.clone(), broker, tokens, config.clone()));
    let mut worker_handles = Vec::with_capacity(worker_count);
    for i in 0..worker_count {
        let dispatcher = dispatcher.clone();
        let worker_cancel = cancel.clone();
        let worker_name = format!("worker-{i}");
        worker_handles.push(tokio::spawn(async move {
            dispatcher.run_worker(&worker_name, worker_cancel).await;
        }));
    }

    tracing::info!(workers = worker_count, tick_ms = config.scheduler_tick_ms, "castpilot serve started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        () = terminate_signal() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    cancel.cancel();
    let _ = scheduler_handle.await;
    for handle in worker_handles {
        let _ = handle.await;
    }
    drop(lock_file);
    tracing::info!("castpilot serve stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await
}
