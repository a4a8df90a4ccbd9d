//! stategraph: Dependency Graph Engine for Infrastructure State
//!
//! Tracks a directed acyclic graph of dependencies between independently
//! written pieces of infrastructure state. Each node exposes named outputs;
//! each edge feeds one output of a producer into a consumer. For every edge
//! the engine knows whether the consumer has seen the producer's current
//! value and whether that value still satisfies its type contract.
//!
//! # Core Concepts
//!
//! - **Nodes**: state owners with a serial and a map of named outputs
//! - **Edges**: `(producer, output key) -> consumer`, never forming a cycle
//! - **Fingerprints**: content hashes that make drift a string comparison
//! - **Status**: per-edge composite of freshness and contract validity;
//!   node status aggregates it and spreads `potentially-stale` downstream
//!
//! # Example
//!
//! ```
//! use stategraph::{EdgeDeclaration, GraphEngine, NodeWrite, Status};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let engine = GraphEngine::in_memory().unwrap();
//! let vpc = engine.declare_node("vpc").unwrap();
//! let app = engine.declare_node("app").unwrap();
//! engine.declare_edge(EdgeDeclaration::new(vpc.id, "vpc_id", app.id)).unwrap();
//!
//! engine
//!     .apply_write(NodeWrite::new(vpc.id, 1).with_output("vpc_id", json!("vpc-111")), None)
//!     .await
//!     .unwrap();
//! assert_eq!(engine.node_status(&app.id).unwrap().status, Status::Pending);
//! engine.shutdown().await;
//! # });
//! ```

pub mod config;
pub mod contract;
mod engine;
mod graph;
pub mod observe;
pub mod query;
pub mod reconcile;
pub mod storage;
pub mod telemetry;

pub use config::{default_db_path, ConfigError, EngineConfig};
pub use engine::{EdgeDeclared, GraphEngine, GraphError, GraphResult};
pub use graph::{
    aggregate, default_local_name, derive, Adjacency, ContractSource, Edge, EdgeDeclaration, EdgeId,
    EdgeTimestamps, Fingerprint, Node, NodeId, NodeSummary, NodeWrite, Output, OutputContract,
    Outputs, Status, StatusInputs, Validity, ValidityStatus,
};
pub use observe::{CapturedInput, ObservationTicket, ObservationTracker};
pub use query::{EdgeView, LayeredResult, NodeStatusReport, OutputRef};
pub use reconcile::{WriteOutcome, WriteReport};
pub use storage::{GraphStore, OpenStore, SqliteStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
