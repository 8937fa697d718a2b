use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use super::{FetchedBatch, SyncCoordinator};
use crate::task::{stopped, TaskHandle};

impl SyncCoordinator {
    /// Run sync cycles every `interval` on the current tokio runtime.
    ///
    /// A fetch task hands complete batches to an apply task over a channel of
    /// capacity one. Blocking fetch and apply work runs on the blocking pool.
    pub fn spawn(self: &Arc<Self>) -> TaskHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (batch_tx, batch_rx) = mpsc::channel(1);

        let fetcher = tokio::spawn(run_fetcher(Arc::clone(self), batch_tx, shutdown_rx.clone()));
        let applier = tokio::spawn(run_applier(Arc::clone(self), batch_rx, shutdown_rx));

        TaskHandle::new("redirect-sync", shutdown_tx, vec![fetcher, applier])
    }
}

async fn run_fetcher(
    coordinator: Arc<SyncCoordinator>,
    batches: mpsc::Sender<FetchedBatch>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = coordinator.options.interval.max(std::time::Duration::from_millis(1));
    let timeout = coordinator.options.fetch_timeout;
    let start = if coordinator.options.sync_on_start {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        let worker = Arc::clone(&coordinator);
        let fetch = tokio::task::spawn_blocking(move || worker.fetch());
        let outcome = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            outcome = tokio::time::timeout(timeout, fetch) => outcome,
        };

        let batch = match outcome {
            Ok(Ok(Ok(batch))) => batch,
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "redirect fetch failed, keeping current rules");
                continue;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "redirect fetch task failed");
                continue;
            }
            Err(_) => {
                tracing::warn!(timeout = ?timeout, "redirect fetch timed out, keeping current rules");
                continue;
            }
        };

        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            sent = batches.send(batch) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    // Dropping the sender closes the channel for the applier
}

async fn run_applier(
    coordinator: Arc<SyncCoordinator>,
    mut batches: mpsc::Receiver<FetchedBatch>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let batch = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            batch = batches.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };

        let worker = Arc::clone(&coordinator);
        match tokio::task::spawn_blocking(move || worker.reconcile(batch)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "redirect reconciliation aborted"),
            Err(e) => tracing::warn!(error = %e, "redirect apply task failed"),
        }
    }
    batches.close();
}
