//! GraphEngine: the main entry point for the dependency graph

use crate::config::EngineConfig;
use crate::contract::{ContractInferrer, ContractValidator, ShapeContracts};
use crate::graph::{
    Edge, EdgeDeclaration, EdgeId, Node, NodeId, NodeSummary, NodeWrite, OutputContract,
};
use crate::observe::ObservationTicket;
use crate::query::{
    self, EdgeView, GraphSnapshot, LayeredQuery, LayeredResult, NodeStatusReport, OutputRef,
    StatusQuery,
};
use crate::reconcile::{Reconciler, WriteOutcome};
use crate::storage::{AddEdgeOutcome, GraphStore, OpenStore, SqliteStore, StorageError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur in engine operations
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Alias already in use: {0}")]
    AliasTaken(String),

    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("No contract on {node}.{output_key}")]
    ContractNotFound { node: NodeId, output_key: String },

    #[error("Edge would create a cycle: {}", join_path(.path))]
    Cycle { path: Vec<NodeId> },

    #[error("Local name '{local_name}' already used by node {consumer}")]
    LocalNameConflict { consumer: NodeId, local_name: String },
}

impl From<StorageError> for GraphError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NodeNotFound(id) => GraphError::NodeNotFound(id.to_string()),
            StorageError::AliasTaken(alias) => GraphError::AliasTaken(alias),
            other => GraphError::Storage(other),
        }
    }
}

fn join_path(path: &[NodeId]) -> String {
    path.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" -> ")
}

/// Result type for engine operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Outcome of [`GraphEngine::declare_edge`]
#[derive(Debug, Clone)]
pub enum EdgeDeclared {
    Created(Edge),
    /// The same `(producer, output_key, consumer)` edge already existed
    Existing(Edge),
}

impl EdgeDeclared {
    pub fn edge(&self) -> &Edge {
        match self {
            EdgeDeclared::Created(edge) | EdgeDeclared::Existing(edge) => edge,
        }
    }

    pub fn into_edge(self) -> Edge {
        match self {
            EdgeDeclared::Created(edge) | EdgeDeclared::Existing(edge) => edge,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EdgeDeclared::Created(_))
    }
}

/// The main engine
///
/// Owns the store and the reconciler. Cheap to clone; clones share
/// everything, including background work.
#[derive(Clone)]
pub struct GraphEngine {
    store: Arc<dyn GraphStore>,
    reconciler: Arc<Reconciler>,
    config: EngineConfig,
}

impl GraphEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        validator: Arc<dyn ContractValidator>,
        inferrer: Arc<dyn ContractInferrer>,
        config: EngineConfig,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone(), validator, inferrer, config.reconcile_settings());
        Self {
            store,
            reconciler: Arc::new(reconciler),
            config,
        }
    }

    /// Engine over `store` with the built-in shape contracts
    pub fn with_store(store: Arc<dyn GraphStore>) -> Self {
        let shapes = Arc::new(ShapeContracts::new());
        Self::new(store, shapes.clone(), shapes, EngineConfig::default())
    }

    pub fn in_memory() -> GraphResult<Self> {
        Ok(Self::with_store(Arc::new(SqliteStore::open_in_memory()?)))
    }

    /// Open the store named by `config` (in memory when it names none)
    pub fn open(config: EngineConfig) -> GraphResult<Self> {
        let store = match &config.database_path {
            Some(path) => SqliteStore::open(path)?,
            None => SqliteStore::open_in_memory()?,
        };
        let shapes = Arc::new(ShapeContracts::new());
        Ok(Self::new(Arc::new(store), shapes.clone(), shapes, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    // === Nodes ===

    pub fn declare_node(&self, alias: impl Into<String>) -> GraphResult<Node> {
        let node = Node::new(alias);
        self.store.insert_node(&node)?;
        tracing::debug!(node = %node.id, alias = %node.alias, "node declared");
        Ok(node)
    }

    pub fn rename_node(&self, id: &NodeId, alias: &str) -> GraphResult<()> {
        self.store.rename_node(id, alias)?;
        Ok(())
    }

    pub fn get_node(&self, id: &NodeId) -> GraphResult<Node> {
        self.store
            .load_node(id)?
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    pub fn node_by_alias(&self, alias: &str) -> GraphResult<Node> {
        self.store
            .find_node_by_alias(alias)?
            .ok_or_else(|| GraphError::NodeNotFound(alias.to_string()))
    }

    pub fn list_nodes(&self) -> GraphResult<Vec<NodeSummary>> {
        Ok(self.store.list_nodes()?.iter().map(Node::summary).collect())
    }

    // === Edges ===

    /// Add an edge, or return the existing one unchanged.
    pub fn declare_edge(&self, declaration: EdgeDeclaration) -> GraphResult<EdgeDeclared> {
        match self.store.add_edge(&declaration)? {
            AddEdgeOutcome::Created(edge) => {
                tracing::info!(
                    edge = %edge.id,
                    producer = %edge.producer,
                    output = %edge.output_key,
                    consumer = %edge.consumer,
                    status = %edge.status,
                    "edge declared"
                );
                Ok(EdgeDeclared::Created(edge))
            }
            AddEdgeOutcome::Existing(edge) => Ok(EdgeDeclared::Existing(edge)),
            AddEdgeOutcome::Cycle(path) => {
                tracing::info!(path = %join_path(&path), "rejected edge closing a cycle");
                Err(GraphError::Cycle { path })
            }
            AddEdgeOutcome::LocalNameTaken(local_name) => Err(GraphError::LocalNameConflict {
                consumer: declaration.consumer,
                local_name,
            }),
        }
    }

    pub fn remove_edge(&self, id: &EdgeId) -> GraphResult<()> {
        if self.store.remove_edge(id)? {
            Ok(())
        } else {
            Err(GraphError::EdgeNotFound(*id))
        }
    }

    pub fn edge_view(&self, id: &EdgeId) -> GraphResult<EdgeView> {
        let edge = self.store.load_edge(id)?.ok_or(GraphError::EdgeNotFound(*id))?;
        Ok(query::edge_view(self.store.as_ref(), edge)?)
    }

    // === Writes and observations ===

    /// Capture what `consumer` is about to read; attach the ticket to its write.
    pub fn capture_inputs(&self, consumer: &NodeId) -> GraphResult<ObservationTicket> {
        self.ensure_node(consumer)?;
        Ok(self.reconciler.tracker().capture(consumer)?)
    }

    /// Record a ticket outside of a write
    pub fn record_observation(&self, consumer: &NodeId, ticket: &ObservationTicket) -> GraphResult<usize> {
        self.ensure_node(consumer)?;
        Ok(self.reconciler.tracker().record_observation(consumer, ticket))
    }

    pub async fn apply_write(&self, write: NodeWrite, ticket: Option<ObservationTicket>) -> GraphResult<WriteOutcome> {
        Ok(self.reconciler.apply_write(write, ticket).await?)
    }

    pub async fn recompute(&self, node: &NodeId) -> GraphResult<usize> {
        Ok(self.reconciler.recompute(node).await?)
    }

    // === Contracts ===

    pub async fn declare_contract(&self, node: &NodeId, output_key: &str, contract: Value) -> GraphResult<OutputContract> {
        Ok(self.reconciler.declare_contract(node, output_key, contract).await?)
    }

    pub async fn remove_contract(&self, node: &NodeId, output_key: &str) -> GraphResult<()> {
        if self.reconciler.remove_contract(node, output_key).await? {
            Ok(())
        } else {
            Err(GraphError::ContractNotFound {
                node: *node,
                output_key: output_key.to_string(),
            })
        }
    }

    pub fn contract(&self, node: &NodeId, output_key: &str) -> GraphResult<Option<OutputContract>> {
        Ok(self.store.load_contract(node, output_key)?)
    }

    // === Queries ===

    pub fn dependencies(&self, node: &NodeId) -> GraphResult<Vec<EdgeView>> {
        self.ensure_node(node)?;
        Ok(query::dependencies(self.store.as_ref(), node)?)
    }

    pub fn dependents(&self, node: &NodeId) -> GraphResult<Vec<EdgeView>> {
        self.ensure_node(node)?;
        Ok(query::dependents(self.store.as_ref(), node)?)
    }

    pub fn search_by_output_key(&self, key: &str) -> GraphResult<Vec<OutputRef>> {
        Ok(query::search_by_output_key(self.store.as_ref(), key)?)
    }

    pub fn nodes_consuming(&self, producer: &NodeId, key: &str) -> GraphResult<Vec<NodeSummary>> {
        self.ensure_node(producer)?;
        Ok(query::nodes_consuming(self.store.as_ref(), producer, key)?)
    }

    /// `root` and everything downstream of it, layered
    pub fn layered_order(&self, root: &NodeId) -> GraphResult<LayeredResult> {
        self.ensure_node(root)?;
        let snapshot = GraphSnapshot::load(self.store.as_ref())?;
        Ok(LayeredQuery::from(*root).execute(&snapshot))
    }

    pub fn layered_order_all(&self) -> GraphResult<LayeredResult> {
        let snapshot = GraphSnapshot::load(self.store.as_ref())?;
        Ok(LayeredQuery::all().execute(&snapshot))
    }

    /// Aggregate status of `node`, recomputed from current edge state
    pub fn node_status(&self, node: &NodeId) -> GraphResult<NodeStatusReport> {
        let snapshot = GraphSnapshot::load(self.store.as_ref())?;
        StatusQuery::new(&snapshot)
            .report(*node)
            .ok_or_else(|| GraphError::NodeNotFound(node.to_string()))
    }

    // === Lifecycle ===

    /// Wait for background inference without cancelling it.
    pub async fn drain(&self) {
        self.reconciler.drain().await;
    }

    /// Cancel background inference and wait for it to stop.
    pub async fn shutdown(&self) {
        self.reconciler.shutdown().await;
    }

    fn ensure_node(&self, id: &NodeId) -> GraphResult<()> {
        match self.store.load_node(id)? {
            Some(_) => Ok(()),
            None => Err(GraphError::NodeNotFound(id.to_string())),
        }
    }
}
