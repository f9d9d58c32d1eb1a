//! Single-slot guard around the update cycle.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

/// Result of asking the supervisor to run an update.
#[derive(Debug, PartialEq, Eq)]
pub enum UpdateOutcome<T> {
    /// The update ran to completion.
    Completed(T),
    /// Another update held the slot; nothing was run.
    AlreadyRunning,
}

/// Allows at most one update at a time. Triggers that arrive while an
/// update runs are rejected, never queued.
#[derive(Debug, Clone, Default)]
pub struct UpdateSupervisor {
    slot: Arc<Mutex<()>>,
}

impl UpdateSupervisor {
    /// Creates an idle supervisor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `update` if the slot is free and waits for it.
    pub async fn run<F>(&self, update: F) -> UpdateOutcome<F::Output>
    where
        F: Future,
    {
        let Ok(_guard) = self.slot.try_lock() else {
            return UpdateOutcome::AlreadyRunning;
        };
        UpdateOutcome::Completed(update.await)
    }

    /// Starts `update` in the background if the slot is free. Returns
    /// `false` when an update is already running.
    pub fn spawn<F>(&self, update: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(guard) = Arc::clone(&self.slot).try_lock_owned() else {
            return false;
        };
        tokio::spawn(async move {
            update.await;
            drop(guard);
        });
        true
    }

    /// Whether an update currently holds the slot.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}
