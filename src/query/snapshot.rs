//! Point-in-time view of the graph that queries run against

use crate::graph::{Edge, NodeId, NodeSummary};
use crate::storage::{GraphStore, StorageResult};
use std::collections::HashMap;

/// Node summaries and edges read from a store in one pass
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    nodes: HashMap<NodeId, NodeSummary>,
    edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn load(store: &dyn GraphStore) -> StorageResult<Self> {
        let nodes = store.list_nodes()?.iter().map(|n| n.summary()).collect();
        Ok(Self::from_parts(nodes, store.all_edges()?))
    }

    pub fn from_parts(nodes: Vec<NodeSummary>, edges: Vec<Edge>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
            edges,
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeSummary> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeSummary> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub(crate) fn alias(&self, id: &NodeId) -> String {
        self.nodes
            .get(id)
            .map(|n| n.alias.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub(crate) fn index(&self) -> EdgeIndex<'_> {
        EdgeIndex::build(&self.edges)
    }
}

/// Index for fast edge lookups
pub(crate) struct EdgeIndex<'a> {
    outgoing: HashMap<&'a NodeId, Vec<&'a Edge>>,
    incoming: HashMap<&'a NodeId, Vec<&'a Edge>>,
}

impl<'a> EdgeIndex<'a> {
    fn build(edges: &'a [Edge]) -> Self {
        let mut outgoing: HashMap<&NodeId, Vec<&Edge>> = HashMap::new();
        let mut incoming: HashMap<&NodeId, Vec<&Edge>> = HashMap::new();

        for edge in edges {
            outgoing.entry(&edge.producer).or_default().push(edge);
            incoming.entry(&edge.consumer).or_default().push(edge);
        }

        Self { outgoing, incoming }
    }

    pub(crate) fn outgoing(&self, node: &NodeId) -> &[&'a Edge] {
        self.outgoing.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub(crate) fn incoming(&self, node: &NodeId) -> &[&'a Edge] {
        self.incoming.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }
}
