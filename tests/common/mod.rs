//! Common test utilities for engine integration tests
//!
//! Provides controllable contract collaborators and small helpers for
//! building graphs and driving writes.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use stategraph::contract::{
    ContractError, ContractInferrer, ContractValidator, ShapeContracts, ValidationOutcome,
};
use stategraph::{
    EngineConfig, GraphEngine, GraphStore, NodeId, NodeWrite, ObservationTicket, OpenStore,
    SqliteStore, WriteOutcome, WriteReport,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

/// Inferrer that blocks until the test releases it
///
/// `started` is notified each time a call begins; each `release()` lets
/// one blocked call finish with a shape contract for its sample.
pub struct GatedInferrer {
    started: Notify,
    gate: Semaphore,
    calls: AtomicUsize,
}

impl GatedInferrer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    /// Wait until an inference call is in flight
    pub async fn wait_started(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.started.notified())
            .await
            .expect("inference never started");
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractInferrer for GatedInferrer {
    async fn infer(&self, sample: &Value) -> Result<Value, ContractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ContractError::Inference(e.to_string()))?;
        permit.forget();
        Ok(ShapeContracts::infer_shape(sample))
    }
}

/// Validator that sleeps before accepting everything
pub struct SlowValidator {
    pub delay: Duration,
}

#[async_trait]
impl ContractValidator for SlowValidator {
    async fn validate(&self, _contract: &Value, _value: &Value) -> ValidationOutcome {
        tokio::time::sleep(self.delay).await;
        ValidationOutcome::Valid
    }
}

/// Validator whose backend is always unavailable
pub struct BrokenValidator;

#[async_trait]
impl ContractValidator for BrokenValidator {
    async fn validate(&self, _contract: &Value, _value: &Value) -> ValidationOutcome {
        ValidationOutcome::Error("validator backend unavailable".to_string())
    }
}

pub fn memory_store() -> Arc<dyn GraphStore> {
    Arc::new(SqliteStore::open_in_memory().expect("in-memory store"))
}

/// Engine with custom collaborators over a fresh in-memory store
pub fn engine_with(
    validator: Arc<dyn ContractValidator>,
    inferrer: Arc<dyn ContractInferrer>,
    config: EngineConfig,
) -> GraphEngine {
    GraphEngine::new(memory_store(), validator, inferrer, config)
}

pub fn engine() -> GraphEngine {
    GraphEngine::in_memory().expect("in-memory engine")
}

/// Apply a write that must not be stale
pub async fn write(
    engine: &GraphEngine,
    node: NodeId,
    serial: u64,
    outputs: &[(&str, Value)],
    ticket: Option<ObservationTicket>,
) -> WriteReport {
    let mut request = NodeWrite::new(node, serial);
    for (key, value) in outputs {
        request = request.with_output(*key, value.clone());
    }
    match engine.apply_write(request, ticket).await.expect("write failed") {
        WriteOutcome::Applied(report) => report,
        WriteOutcome::Stale { stored } => panic!("write at {} was stale (stored {})", serial, stored),
    }
}

/// Consumer write that observes everything it currently reads
pub async fn observe_and_write(engine: &GraphEngine, consumer: NodeId, serial: u64) -> WriteReport {
    let ticket = engine.capture_inputs(&consumer).expect("capture failed");
    write(engine, consumer, serial, &[("ready", json!(true))], Some(ticket)).await
}
