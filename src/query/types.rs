//! Query result structures

use crate::graph::{Edge, EdgeId, NodeId, NodeSummary, Status};
use serde::Serialize;

/// An edge together with the aliases of both ends
#[derive(Debug, Clone, Serialize)]
pub struct EdgeView {
    pub producer_alias: String,
    pub consumer_alias: String,
    #[serde(flatten)]
    pub edge: Edge,
}

impl EdgeView {
    pub fn status(&self) -> Status {
        self.edge.status
    }

    /// Detail text of the last contract check, if any
    pub fn validity_detail(&self) -> Option<&str> {
        self.edge.validity.detail.as_deref()
    }
}

/// A node exposing an output key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRef {
    pub node: NodeId,
    pub alias: String,
    pub key: String,
}

/// One incoming edge as seen by node aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncomingStatus {
    pub edge: EdgeId,
    pub producer: NodeId,
    pub producer_alias: String,
    pub output_key: String,
    pub local_name: String,
    pub status: Status,
    /// Aggregate status of the producer node
    pub producer_status: Status,
}

/// Aggregate status of a node and what it was derived from
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatusReport {
    pub node: NodeSummary,
    pub status: Status,
    pub incoming: Vec<IncomingStatus>,
}

impl NodeStatusReport {
    /// Producers whose own staleness propagated into this node
    pub fn stale_producers(&self) -> Vec<NodeId> {
        let mut producers: Vec<NodeId> = self
            .incoming
            .iter()
            .filter(|i| i.status.is_clean() && i.producer_status.taints_downstream())
            .map(|i| i.producer)
            .collect();
        producers.sort();
        producers.dedup();
        producers
    }
}

/// Nodes grouped into dependency layers
#[derive(Debug, Clone, Default, Serialize)]
pub struct LayeredResult {
    /// `None` when the whole graph was layered
    pub root: Option<NodeId>,
    /// Layer 0 first; each layer sorted by alias
    pub layers: Vec<Vec<NodeSummary>>,
}

impl LayeredResult {
    pub fn at_depth(&self, depth: usize) -> &[NodeSummary] {
        self.layers.get(depth).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    /// Layer index of `node`, if it is part of the result
    pub fn depth_of(&self, node: &NodeId) -> Option<usize> {
        self.layers
            .iter()
            .position(|layer| layer.iter().any(|n| n.id == *node))
    }

    /// Aliases layer by layer
    pub fn aliases(&self) -> Vec<Vec<String>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|n| n.alias.clone()).collect())
            .collect()
    }
}
