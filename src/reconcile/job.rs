//! Write application and edge recomputation

use super::Reconciler;
use crate::contract::ValidationOutcome;
use crate::graph::{
    ContractSource, Edge, Fingerprint, NodeId, NodeSummary, NodeWrite, OutputContract, Validity,
    ValidityStatus,
};
use crate::observe::ObservationTicket;
use crate::storage::{CommitOutcome, StorageError, StorageResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a write did
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteReport {
    pub node: Option<NodeSummary>,
    /// Output keys present before the write and absent after it
    pub removed_outputs: Vec<String>,
    /// Validity of every output that carried a contract
    pub validated: BTreeMap<String, ValidityStatus>,
    /// Outputs sent to background inference
    pub inference_scheduled: Vec<String>,
    pub edges_updated: usize,
    /// Edges whose update failed; logged and left for the next write
    pub edge_failures: usize,
    /// Outputs whose contract or edge bookkeeping hit a store error after
    /// the commit; logged and left for the next write or `recompute`
    pub output_failures: usize,
    /// Incoming edges that recorded the attached observation ticket
    pub observations_recorded: usize,
}

/// Result of [`Reconciler::apply_write`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    Applied(WriteReport),
    /// The serial was not newer than the stored one; nothing changed
    Stale { stored: u64 },
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }

    pub fn report(&self) -> Option<&WriteReport> {
        match self {
            WriteOutcome::Applied(report) => Some(report),
            WriteOutcome::Stale { .. } => None,
        }
    }
}

impl WriteReport {
    fn output_failed(&mut self, node: &NodeId, key: &str, error: &StorageError) {
        self.output_failures += 1;
        tracing::warn!(node = %node, output = key, error = %error, "failed to reconcile output");
    }
}

impl Reconciler {
    /// Commit a content write and reconcile the edges it touches.
    ///
    /// Validation of contracted outputs finishes before this returns;
    /// inference for uncontracted outputs is only scheduled.
    pub async fn apply_write(
        self: &Arc<Self>,
        write: NodeWrite,
        ticket: Option<ObservationTicket>,
    ) -> StorageResult<WriteOutcome> {
        let node_id = write.node;
        let guard = self.locks.lock(node_id).await;

        let outputs = write.fingerprinted();
        let (previous, node) = match self.store.commit_write(&node_id, write.serial, &outputs)? {
            CommitOutcome::Applied { previous, node } => (previous, node),
            CommitOutcome::Stale { stored } => {
                tracing::info!(
                    node = %node_id,
                    serial = write.serial,
                    stored,
                    "rejected out-of-order write"
                );
                return Ok(WriteOutcome::Stale { stored });
            }
        };
        tracing::debug!(node = %node_id, alias = %node.alias, serial = node.serial, "write committed");

        let mut report = WriteReport {
            node: Some(node.summary()),
            ..Default::default()
        };

        // The write is durable from here on; store errors are per output
        for key in previous.keys().filter(|key| !node.has_output(key)) {
            if let Err(e) = self.handle_removed_output(&node_id, key, &mut report) {
                report.output_failed(&node_id, key, &e);
            }
            report.removed_outputs.push(key.clone());
        }

        let mut uncontracted: Vec<(String, Value)> = Vec::new();
        for (key, output) in &node.outputs {
            let validity = match self.store.load_contract(&node_id, key) {
                Ok(Some(contract)) => {
                    let validity = self.check_contract(&contract, &output.value, node.serial).await;
                    if let Err(e) = self.store.save_contract(&contract.with_validity(validity.clone())) {
                        report.output_failed(&node_id, key, &e);
                    }
                    report.validated.insert(key.clone(), validity.status);
                    validity
                }
                Ok(None) => {
                    uncontracted.push((key.clone(), output.value.clone()));
                    Validity::unchecked()
                }
                Err(e) => {
                    // Unknown contract: edges still move to the new fingerprint
                    report.output_failed(&node_id, key, &e);
                    Validity::unchecked()
                }
            };
            let fingerprint = Some(output.fingerprint.clone());
            if let Err(e) = self.refresh_output_edges(&node_id, key, fingerprint, validity, &mut report) {
                report.output_failed(&node_id, key, &e);
            }
        }

        if let Some(ticket) = &ticket {
            report.observations_recorded = self.tracker.record_observation(&node_id, ticket);
        }

        drop(guard);

        for (key, sample) in uncontracted {
            if self.schedule_inference(node_id, key.clone(), sample, node.serial) {
                report.inference_scheduled.push(key);
            }
        }

        tracing::info!(
            node = %node_id,
            serial = node.serial,
            edges = report.edges_updated,
            edge_failures = report.edge_failures,
            output_failures = report.output_failures,
            removed = report.removed_outputs.len(),
            "write reconciled"
        );
        Ok(WriteOutcome::Applied(report))
    }

    /// Re-derive every edge touching `node` from stored state.
    ///
    /// Returns the number of edges rewritten.
    pub async fn recompute(&self, node: &NodeId) -> StorageResult<usize> {
        let _guard = self.locks.lock(*node).await;
        let stored = self
            .store
            .load_node(node)?
            .ok_or(StorageError::NodeNotFound(*node))?;

        let mut report = WriteReport::default();
        let mut keys: Vec<String> = self
            .store
            .edges_from(node)?
            .into_iter()
            .map(|edge| edge.output_key)
            .collect();
        keys.sort();
        keys.dedup();
        for key in keys {
            let fingerprint = stored.output(&key).map(|o| o.fingerprint.clone());
            let validity = match (&fingerprint, self.store.load_contract(node, &key)?) {
                (Some(_), Some(contract)) => contract.validity,
                _ => Validity::unchecked(),
            };
            self.refresh_output_edges(node, &key, fingerprint, validity, &mut report)?;
        }

        for edge in self.store.edges_to(node)? {
            let mut refresh = |e: &mut Edge| e.refresh_status();
            match self.store.update_edge(&edge.id, &mut refresh) {
                Ok(Some(_)) => report.edges_updated += 1,
                Ok(None) => {}
                Err(e) => {
                    report.edge_failures += 1;
                    tracing::warn!(edge = %edge.id, error = %e, "failed to recompute edge");
                }
            }
        }

        tracing::debug!(node = %node, edges = report.edges_updated, "recomputed");
        Ok(report.edges_updated)
    }

    /// Attach a user-declared contract, validating it now if the output exists.
    pub async fn declare_contract(
        &self,
        node: &NodeId,
        output_key: &str,
        contract: Value,
    ) -> StorageResult<OutputContract> {
        let _guard = self.locks.lock(*node).await;
        let stored = self
            .store
            .load_node(node)?
            .ok_or(StorageError::NodeNotFound(*node))?;

        let mut declared = OutputContract::declared(*node, output_key, contract);
        let mut report = WriteReport::default();
        match stored.output(output_key) {
            Some(output) => {
                let validity = self.check_contract(&declared, &output.value, stored.serial).await;
                declared = declared.with_validity(validity.clone());
                self.store.save_contract(&declared)?;
                let fingerprint = Some(output.fingerprint.clone());
                self.refresh_output_edges(node, output_key, fingerprint, validity, &mut report)?;
            }
            None => self.store.save_contract(&declared)?,
        }

        tracing::info!(node = %node, output = output_key, validity = ?declared.validity.status, "contract declared");
        Ok(declared)
    }

    /// Drop a contract of either source; edges fall back to unchecked.
    pub async fn remove_contract(&self, node: &NodeId, output_key: &str) -> StorageResult<bool> {
        let _guard = self.locks.lock(*node).await;
        if !self.store.delete_contract(node, output_key)? {
            return Ok(false);
        }
        let fingerprint = self
            .store
            .load_node(node)?
            .and_then(|n| n.output(output_key).map(|o| o.fingerprint.clone()));
        let mut report = WriteReport::default();
        self.refresh_output_edges(node, output_key, fingerprint, Validity::unchecked(), &mut report)?;
        Ok(true)
    }

    /// Run the validator under the configured timeout.
    ///
    /// Collaborator failures and timeouts become an `Error` validity.
    pub(crate) async fn check_contract(&self, contract: &OutputContract, value: &Value, serial: u64) -> Validity {
        let limit = self.settings.validation_timeout;
        match tokio::time::timeout(limit, self.validator.validate(&contract.contract, value)).await {
            Ok(ValidationOutcome::Valid) => Validity::checked(ValidityStatus::Valid, None, serial),
            Ok(ValidationOutcome::Invalid(detail)) => {
                tracing::debug!(node = %contract.node, output = %contract.output_key, %detail, "output violates contract");
                Validity::checked(ValidityStatus::Invalid, Some(detail), serial)
            }
            Ok(ValidationOutcome::Error(detail)) => {
                tracing::warn!(node = %contract.node, output = %contract.output_key, %detail, "validation failed");
                Validity::checked(ValidityStatus::Error, Some(detail), serial)
            }
            Err(_) => {
                tracing::warn!(
                    node = %contract.node,
                    output = %contract.output_key,
                    timeout_ms = limit.as_millis() as u64,
                    "validation timed out"
                );
                Validity::checked(
                    ValidityStatus::Error,
                    Some(format!("validation timed out after {} ms", limit.as_millis())),
                    serial,
                )
            }
        }
    }

    fn handle_removed_output(&self, node: &NodeId, key: &str, report: &mut WriteReport) -> StorageResult<()> {
        if let Some(contract) = self.store.load_contract(node, key)? {
            match contract.source {
                ContractSource::Inferred => {
                    self.store.delete_contract(node, key)?;
                    tracing::debug!(node = %node, output = key, "dropped inferred contract of removed output");
                }
                ContractSource::Declared => {}
            }
        }
        self.refresh_output_edges(node, key, None, Validity::unchecked(), report)
    }

    /// Push the producer's state for one output onto every edge consuming it.
    ///
    /// Listing the edges can fail the call; a failure on a single edge is
    /// counted and logged.
    pub(crate) fn refresh_output_edges(
        &self,
        producer: &NodeId,
        key: &str,
        fingerprint: Option<Fingerprint>,
        validity: Validity,
        report: &mut WriteReport,
    ) -> StorageResult<()> {
        for edge in self.store.edges_for_output(producer, key)? {
            let mut apply = |e: &mut Edge| e.set_producer_state(fingerprint.clone(), validity.clone());
            match self.store.update_edge(&edge.id, &mut apply) {
                Ok(Some(updated)) => {
                    report.edges_updated += 1;
                    if updated.status != edge.status {
                        tracing::debug!(
                            edge = %edge.id,
                            from = %edge.status,
                            to = %updated.status,
                            "edge status changed"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    report.edge_failures += 1;
                    tracing::warn!(edge = %edge.id, error = %e, "failed to update edge");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ShapeContracts;
    use crate::graph::{EdgeDeclaration, Node, Status};
    use crate::reconcile::ReconcileSettings;
    use crate::storage::{AddEdgeOutcome, GraphStore, OpenStore, SqliteStore};
    use serde_json::json;

    fn reconciler() -> (Arc<Reconciler>, Arc<dyn GraphStore>) {
        let store: Arc<dyn GraphStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let shapes = Arc::new(ShapeContracts::new());
        let r = Reconciler::new(store.clone(), shapes.clone(), shapes, ReconcileSettings::default());
        (Arc::new(r), store)
    }

    fn node(store: &Arc<dyn GraphStore>, alias: &str) -> NodeId {
        let n = Node::new(alias);
        store.insert_node(&n).unwrap();
        n.id
    }

    fn edge(store: &Arc<dyn GraphStore>, decl: EdgeDeclaration) -> Edge {
        match store.add_edge(&decl).unwrap() {
            AddEdgeOutcome::Created(e) => e,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn stale_write_is_rejected() {
        let (r, store) = reconciler();
        let a = node(&store, "a");
        r.apply_write(NodeWrite::new(a, 5).with_output("x", json!(1)), None)
            .await
            .unwrap();
        let outcome = r
            .apply_write(NodeWrite::new(a, 5).with_output("x", json!(2)), None)
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Stale { stored: 5 }));
        let stored = store.load_node(&a).unwrap().unwrap();
        assert_eq!(stored.output("x").unwrap().value, json!(1));
    }

    #[tokio::test]
    async fn write_drifts_observed_edge() {
        let (r, store) = reconciler();
        let a = node(&store, "a");
        let b = node(&store, "b");
        r.apply_write(NodeWrite::new(a, 1).with_output("x", json!(1)), None)
            .await
            .unwrap();
        let e = edge(&store, EdgeDeclaration::new(a, "x", b));

        let ticket = r.tracker().capture(&b).unwrap();
        let outcome = r.apply_write(NodeWrite::new(b, 1), Some(ticket)).await.unwrap();
        assert_eq!(outcome.report().unwrap().observations_recorded, 1);
        assert_eq!(store.load_edge(&e.id).unwrap().unwrap().status, Status::Clean);

        r.apply_write(NodeWrite::new(a, 2).with_output("x", json!(2)), None)
            .await
            .unwrap();
        let drifted = store.load_edge(&e.id).unwrap().unwrap();
        assert_eq!(drifted.status, Status::Dirty);
        assert!(drifted.timestamps.drifted_at.is_some());
        r.drain().await;
    }

    #[tokio::test]
    async fn removed_output_marks_edges_missing() {
        let (r, store) = reconciler();
        let a = node(&store, "a");
        let b = node(&store, "b");
        r.apply_write(NodeWrite::new(a, 1).with_output("x", json!(1)), None)
            .await
            .unwrap();
        let e = edge(&store, EdgeDeclaration::new(a, "x", b));

        let outcome = r.apply_write(NodeWrite::new(a, 2), None).await.unwrap();
        assert_eq!(outcome.report().unwrap().removed_outputs, vec!["x".to_string()]);
        let missing = store.load_edge(&e.id).unwrap().unwrap();
        assert_eq!(missing.status, Status::MissingOutput);
        assert!(missing.timestamps.missing_since.is_some());
        r.drain().await;
    }

    #[tokio::test]
    async fn declared_contract_is_validated_on_write() {
        let (r, store) = reconciler();
        let a = node(&store, "a");
        let b = node(&store, "b");
        r.declare_contract(&a, "x", json!({"type": "string"})).await.unwrap();
        let e = edge(&store, EdgeDeclaration::new(a, "x", b));

        let outcome = r
            .apply_write(NodeWrite::new(a, 1).with_output("x", json!(42)), None)
            .await
            .unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.validated.get("x"), Some(&ValidityStatus::Invalid));
        assert!(report.inference_scheduled.is_empty());

        let ticket = r.tracker().capture(&b).unwrap();
        r.apply_write(NodeWrite::new(b, 1), Some(ticket)).await.unwrap();
        assert_eq!(store.load_edge(&e.id).unwrap().unwrap().status, Status::CleanInvalid);
    }

    #[tokio::test]
    async fn mock_edge_switches_to_real_value() {
        let (r, store) = reconciler();
        let a = node(&store, "a");
        let b = node(&store, "b");
        let e = edge(&store, EdgeDeclaration::new(a, "x", b).with_mock(json!("placeholder")));
        assert_eq!(e.status, Status::Mock);

        r.apply_write(NodeWrite::new(a, 1).with_output("x", json!("real")), None)
            .await
            .unwrap();
        let real = store.load_edge(&e.id).unwrap().unwrap();
        assert!(!real.is_mock());
        assert_eq!(real.status, Status::Pending);
        r.drain().await;
    }

    #[tokio::test]
    async fn unreadable_contract_does_not_abort_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        let store: Arc<dyn GraphStore> = Arc::new(SqliteStore::open(&path).unwrap());
        let shapes = Arc::new(ShapeContracts::new());
        let r = Arc::new(Reconciler::new(store.clone(), shapes.clone(), shapes, ReconcileSettings::default()));

        let upstream = node(&store, "upstream");
        let a = node(&store, "a");
        let c = node(&store, "c");
        r.apply_write(NodeWrite::new(upstream, 1).with_output("id", json!("u-1")), None)
            .await
            .unwrap();
        let incoming = edge(&store, EdgeDeclaration::new(upstream, "id", a));
        let first = edge(&store, EdgeDeclaration::new(a, "first", c));
        let second = edge(&store, EdgeDeclaration::new(a, "second", c));

        // A contract row that no longer deserializes
        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute(
            "INSERT INTO contracts (node_id, output_key, contract_json, source, validity_json, created_at)
             VALUES (?1, 'first', 'not json', 'declared', '{}', ?2)",
            rusqlite::params![a.to_string(), chrono::Utc::now().to_rfc3339()],
        )
        .unwrap();
        drop(raw);

        let ticket = r.tracker().capture(&a).unwrap();
        let outcome = r
            .apply_write(
                NodeWrite::new(a, 1)
                    .with_output("first", json!(1))
                    .with_output("second", json!(2)),
                Some(ticket),
            )
            .await
            .unwrap();
        let report = outcome.report().expect("write applied");
        assert_eq!(report.output_failures, 1);
        assert_eq!(report.observations_recorded, 1);
        assert_eq!(report.inference_scheduled, vec!["second".to_string()]);

        let first = store.load_edge(&first.id).unwrap().unwrap();
        assert_eq!(first.producer_fingerprint, Some(Fingerprint::of(&json!(1))));
        let second = store.load_edge(&second.id).unwrap().unwrap();
        assert_eq!(second.producer_fingerprint, Some(Fingerprint::of(&json!(2))));
        assert_eq!(store.load_edge(&incoming.id).unwrap().unwrap().status, Status::Clean);
        assert_eq!(store.load_node(&a).unwrap().unwrap().serial, 1);
        r.drain().await;
    }

    #[tokio::test]
    async fn recompute_missing_node_errors() {
        let (r, _) = reconciler();
        assert!(matches!(
            r.recompute(&NodeId::new()).await,
            Err(StorageError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_contract_resets_validity() {
        let (r, store) = reconciler();
        let a = node(&store, "a");
        let b = node(&store, "b");
        r.apply_write(NodeWrite::new(a, 1).with_output("x", json!(1)), None)
            .await
            .unwrap();
        r.drain().await;
        r.remove_contract(&a, "x").await.unwrap();
        r.declare_contract(&a, "x", json!({"type": "string"})).await.unwrap();
        let e = edge(&store, EdgeDeclaration::new(a, "x", b));
        assert!(e.validity.is_invalid());

        assert!(r.remove_contract(&a, "x").await.unwrap());
        let reset = store.load_edge(&e.id).unwrap().unwrap();
        assert_eq!(reset.validity.status, ValidityStatus::Unchecked);
        assert!(!r.remove_contract(&a, "x").await.unwrap());
    }
}
