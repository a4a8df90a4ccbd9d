//! Background task set

use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinSet;

/// Tracks spawned background work so it can be drained on shutdown.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn onto the current runtime and reap finished tasks.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = match self.set.lock() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        while let Some(result) = set.try_join_next() {
            if let Err(e) = result {
                tracing::warn!(error = %e, "background task failed");
            }
        }
        set.spawn(task);
    }

    /// Number of tasks not yet reaped
    pub fn len(&self) -> usize {
        match self.set.lock() {
            Ok(set) => set.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Await every task, including tasks spawned while draining.
    pub async fn drain(&self) {
        loop {
            let mut batch = {
                let mut set = match self.set.lock() {
                    Ok(set) => set,
                    Err(poisoned) => poisoned.into_inner(),
                };
                std::mem::take(&mut *set)
            };
            if batch.is_empty() {
                return;
            }
            while let Some(result) = batch.join_next().await {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "background task failed");
                }
            }
        }
    }
}
