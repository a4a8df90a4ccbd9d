//! Background contract inference

use super::Reconciler;
use crate::graph::{ContractSource, Edge, NodeId, OutputContract, Validity, ValidityStatus};
use crate::storage::StorageResult;
use serde_json::Value;
use std::sync::Arc;

impl Reconciler {
    /// Queue inference for an output that has no contract.
    ///
    /// Returns false once the reconciler has been shut down.
    pub(crate) fn schedule_inference(
        self: &Arc<Self>,
        node: NodeId,
        output_key: String,
        sample: Value,
        started_serial: u64,
    ) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            let cancel = this.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(node = %node, output = %output_key, "inference cancelled");
                }
                _ = this.infer_and_store(node, &output_key, &sample, started_serial) => {}
            }
        });
        true
    }

    async fn infer_and_store(&self, node: NodeId, output_key: &str, sample: &Value, started_serial: u64) {
        let _permit = match self.inference_permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!(error = %e, "inference semaphore closed");
                return;
            }
        };

        let limit = self.settings.inference_timeout;
        let document = match tokio::time::timeout(limit, self.inferrer.infer(sample)).await {
            Ok(Ok(document)) => document,
            Ok(Err(e)) => {
                tracing::warn!(node = %node, output = output_key, error = %e, "inference failed");
                return;
            }
            Err(_) => {
                tracing::warn!(
                    node = %node,
                    output = output_key,
                    timeout_ms = limit.as_millis() as u64,
                    "inference timed out"
                );
                return;
            }
        };

        // The contract was derived from this very sample
        let contract = OutputContract::inferred(node, output_key, document)
            .with_validity(Validity::checked(ValidityStatus::Valid, None, started_serial));

        match self.store.save_inferred_contract(&contract, started_serial) {
            Ok(true) => {
                tracing::debug!(node = %node, output = output_key, serial = started_serial, "inferred contract stored");
                if let Err(e) = self.snapshot_inferred_validity(&node, output_key).await {
                    tracing::warn!(node = %node, output = output_key, error = %e, "failed to refresh edges after inference");
                }
            }
            Ok(false) => {
                tracing::debug!(
                    node = %node,
                    output = output_key,
                    serial = started_serial,
                    "discarded inferred contract for superseded state"
                );
            }
            Err(e) => {
                tracing::warn!(node = %node, output = output_key, error = %e, "failed to store inferred contract");
            }
        }
    }

    /// Copy the stored contract's validity onto the output's edges.
    ///
    /// Re-reads under the node lock so a write that landed after the
    /// contract was saved wins.
    async fn snapshot_inferred_validity(&self, node: &NodeId, output_key: &str) -> StorageResult<()> {
        let _guard = self.locks.lock(*node).await;
        let Some(contract) = self.store.load_contract(node, output_key)? else {
            return Ok(());
        };
        if contract.source != ContractSource::Inferred {
            return Ok(());
        }
        for edge in self.store.edges_for_output(node, output_key)? {
            let mut apply = |e: &mut Edge| {
                if e.producer_fingerprint.is_some() {
                    e.validity = contract.validity.clone();
                    e.refresh_status();
                }
            };
            if let Err(e) = self.store.update_edge(&edge.id, &mut apply) {
                tracing::warn!(edge = %edge.id, error = %e, "failed to snapshot validity");
            }
        }
        Ok(())
    }
}
