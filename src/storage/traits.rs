//! Storage trait definitions

use crate::graph::{Edge, EdgeDeclaration, EdgeId, Fingerprint, Node, NodeId, OutputContract, Outputs};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Alias already in use: {0}")]
    AliasTaken(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Serial {0} exceeds the storable range")]
    SerialOutOfRange(u64),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of an edge insert attempt
#[derive(Debug, Clone)]
pub enum AddEdgeOutcome {
    /// A new edge was inserted
    Created(Edge),
    /// `(producer, output_key, consumer)` already existed; returned untouched
    Existing(Edge),
    /// Inserting would close this cycle (`producer -> consumer -> ... -> producer`)
    Cycle(Vec<NodeId>),
    /// The consumer already uses this local name for another edge
    LocalNameTaken(String),
}

/// Outcome of a content write
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// Outputs replaced; carries the fingerprints that were replaced
    Applied {
        previous: BTreeMap<String, Fingerprint>,
        node: Node,
    },
    /// Serial not newer than the stored one; nothing changed
    Stale { stored: u64 },
}

/// Trait for graph storage backends
///
/// Implementations must be thread-safe (Send + Sync). Every method is
/// atomic on its own; `add_edge`, `commit_write`, `update_edge` and
/// `save_inferred_contract` perform their check and their write inside
/// a single transaction.
pub trait GraphStore: Send + Sync {
    // === Node Operations ===

    /// Insert a new node; fails if the alias is taken
    fn insert_node(&self, node: &Node) -> StorageResult<()>;

    /// Load a node with its outputs
    fn load_node(&self, id: &NodeId) -> StorageResult<Option<Node>>;

    /// Look a node up by alias
    fn find_node_by_alias(&self, alias: &str) -> StorageResult<Option<Node>>;

    /// Change a node's alias
    fn rename_node(&self, id: &NodeId, alias: &str) -> StorageResult<()>;

    /// All nodes, without outputs loaded
    fn list_nodes(&self) -> StorageResult<Vec<Node>>;

    /// Replace a node's outputs if `serial` is newer than the stored serial
    fn commit_write(&self, id: &NodeId, serial: u64, outputs: &Outputs) -> StorageResult<CommitOutcome>;

    /// Every `(node, output_key)` whose key equals `key`
    fn search_outputs(&self, key: &str) -> StorageResult<Vec<(NodeId, String)>>;

    // === Contract Operations ===

    fn load_contract(&self, node: &NodeId, output_key: &str) -> StorageResult<Option<OutputContract>>;

    fn load_contracts(&self, node: &NodeId) -> StorageResult<Vec<OutputContract>>;

    /// Insert or replace a contract
    fn save_contract(&self, contract: &OutputContract) -> StorageResult<()>;

    fn delete_contract(&self, node: &NodeId, output_key: &str) -> StorageResult<bool>;

    /// Persist an inferred contract only if the node is still at
    /// `started_serial`, the output still exists and no contract was saved
    /// in the meantime. Returns whether it was persisted.
    fn save_inferred_contract(&self, contract: &OutputContract, started_serial: u64) -> StorageResult<bool>;

    // === Edge Operations ===

    /// Cycle-checked, idempotent edge insert.
    ///
    /// A new edge is seeded with the producer's current output fingerprint
    /// and contract validity inside the same transaction.
    fn add_edge(&self, declaration: &EdgeDeclaration) -> StorageResult<AddEdgeOutcome>;

    fn load_edge(&self, id: &EdgeId) -> StorageResult<Option<Edge>>;

    fn remove_edge(&self, id: &EdgeId) -> StorageResult<bool>;

    /// Read-modify-write of one edge inside a transaction.
    ///
    /// Returns the updated edge, or `None` if it no longer exists.
    fn update_edge(&self, id: &EdgeId, update: &mut dyn FnMut(&mut Edge)) -> StorageResult<Option<Edge>>;

    /// Edges whose producer is `node`
    fn edges_from(&self, node: &NodeId) -> StorageResult<Vec<Edge>>;

    /// Edges whose consumer is `node`
    fn edges_to(&self, node: &NodeId) -> StorageResult<Vec<Edge>>;

    /// Edges consuming `(producer, output_key)`
    fn edges_for_output(&self, producer: &NodeId, output_key: &str) -> StorageResult<Vec<Edge>>;

    fn all_edges(&self) -> StorageResult<Vec<Edge>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: GraphStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
