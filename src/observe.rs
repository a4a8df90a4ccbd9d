//! Observation tracking
//!
//! A consumer's write pipeline captures the producer fingerprints it is
//! about to read (`capture`) and, once the write commits, those captured
//! fingerprints become the edges' observed fingerprints
//! (`record_observation`). Drift is fingerprint inequality between what an
//! edge's producer holds now and what its consumer last observed.

use crate::graph::{EdgeId, Fingerprint, NodeId};
use crate::storage::{GraphStore, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One captured input of a consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedInput {
    pub edge: EdgeId,
    pub fingerprint: Fingerprint,
}

/// Producer fingerprints captured before a consumer's write pipeline ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationTicket {
    pub consumer: NodeId,
    pub inputs: Vec<CapturedInput>,
    pub captured_at: DateTime<Utc>,
}

impl ObservationTicket {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Captures and records observations against a store
#[derive(Clone)]
pub struct ObservationTracker {
    store: Arc<dyn GraphStore>,
}

impl ObservationTracker {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Snapshot the fingerprints currently visible on every incoming edge.
    ///
    /// Mock edges contribute the placeholder's fingerprint; edges whose
    /// output is missing are skipped.
    pub fn capture(&self, consumer: &NodeId) -> StorageResult<ObservationTicket> {
        let inputs = self
            .store
            .edges_to(consumer)?
            .into_iter()
            .filter_map(|edge| {
                edge.effective_fingerprint().map(|fingerprint| CapturedInput {
                    edge: edge.id,
                    fingerprint,
                })
            })
            .collect();

        Ok(ObservationTicket {
            consumer: *consumer,
            inputs,
            captured_at: Utc::now(),
        })
    }

    /// Apply a ticket after the consumer's write committed.
    ///
    /// Returns how many edges recorded the observation. Entries for edges
    /// removed since capture are ignored; a failure on one edge is logged
    /// and the rest proceed.
    pub fn record_observation(&self, consumer: &NodeId, ticket: &ObservationTicket) -> usize {
        if ticket.consumer != *consumer {
            tracing::warn!(
                %consumer,
                ticket_consumer = %ticket.consumer,
                "observation ticket belongs to another node; ignored"
            );
            return 0;
        }

        let mut recorded = 0;
        for input in &ticket.inputs {
            let mut observe = |edge: &mut crate::graph::Edge| {
                if edge.consumer == *consumer {
                    edge.observe(input.fingerprint.clone());
                }
            };
            match self.store.update_edge(&input.edge, &mut observe) {
                Ok(Some(_)) => recorded += 1,
                Ok(None) => {
                    tracing::debug!(edge = %input.edge, "observed edge no longer exists");
                }
                Err(e) => {
                    tracing::warn!(edge = %input.edge, error = %e, "failed to record observation");
                }
            }
        }
        recorded
    }

    /// Fingerprint of a producer's output right now, `None` if absent
    pub fn current_fingerprint(&self, producer: &NodeId, output_key: &str) -> StorageResult<Option<Fingerprint>> {
        Ok(self
            .store
            .load_node(producer)?
            .and_then(|node| node.output(output_key).map(|o| o.fingerprint.clone())))
    }
}
