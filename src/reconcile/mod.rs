//! Reconciliation after content writes
//!
//! Every write goes through [`Reconciler::apply_write`] under the node's
//! advisory lock: the serial compare-and-set commit, contract handling for
//! removed outputs, synchronous validation of present outputs, outgoing
//! edge refresh and the writer's observation ticket. Contract inference for
//! outputs without a contract runs afterwards in the background.

mod inference;
mod job;
mod locks;
mod tasks;

pub use job::{WriteOutcome, WriteReport};
pub use locks::NodeLocks;
pub use tasks::BackgroundTasks;

use crate::contract::{ContractInferrer, ContractValidator};
use crate::observe::ObservationTracker;
use crate::storage::GraphStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Timeouts and limits for reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Bound on one synchronous contract validation
    pub validation_timeout: Duration,
    /// Bound on one background inference call
    pub inference_timeout: Duration,
    /// Maximum concurrent inference calls
    pub inference_concurrency: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            validation_timeout: Duration::from_secs(5),
            inference_timeout: Duration::from_secs(30),
            inference_concurrency: 4,
        }
    }
}

/// Applies writes and keeps edge state consistent with them.
///
/// Held in an `Arc`; background inference tasks keep a clone alive until
/// they finish or are cancelled.
pub struct Reconciler {
    store: Arc<dyn GraphStore>,
    tracker: ObservationTracker,
    validator: Arc<dyn ContractValidator>,
    inferrer: Arc<dyn ContractInferrer>,
    settings: ReconcileSettings,
    locks: NodeLocks,
    tasks: BackgroundTasks,
    inference_permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn GraphStore>,
        validator: Arc<dyn ContractValidator>,
        inferrer: Arc<dyn ContractInferrer>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            tracker: ObservationTracker::new(store.clone()),
            store,
            validator,
            inferrer,
            inference_permits: Arc::new(Semaphore::new(settings.inference_concurrency.max(1))),
            settings,
            locks: NodeLocks::new(),
            tasks: BackgroundTasks::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &ObservationTracker {
        &self.tracker
    }

    /// Background tasks not yet reaped
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for all in-flight background work without cancelling it.
    pub async fn drain(&self) {
        self.tasks.drain().await;
    }

    /// Cancel background work, then wait for it to wind down.
    ///
    /// Writes after shutdown still apply; they just schedule no inference.
    pub async fn shutdown(&self) {
        tracing::info!(pending = self.tasks.len(), "reconciler shutting down");
        self.cancel.cancel();
        self.tasks.drain().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
