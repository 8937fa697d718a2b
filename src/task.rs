//! Background task handles.

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to one or more background tasks sharing a stop signal.
///
/// Dropping the handle signals the tasks to stop without waiting for them.
pub struct TaskHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl TaskHandle {
    pub(crate) fn new(
        name: &'static str,
        shutdown: watch::Sender<bool>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            name,
            shutdown,
            tasks,
        }
    }

    /// Name used in log lines
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True once every task has exited
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }

    /// Signal the tasks to stop and wait for them to exit
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!(task = self.name, error = %e, "background task ended abnormally");
            }
        }
        tracing::debug!(task = self.name, "background task stopped");
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Resolves once the stop signal is raised or its sender is gone
pub(crate) async fn stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
