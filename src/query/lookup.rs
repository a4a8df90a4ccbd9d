//! Direct store lookups: edge views, output search, inverse lookup

use super::types::{EdgeView, OutputRef};
use crate::graph::{Edge, NodeId, NodeSummary};
use crate::storage::{GraphStore, StorageResult};
use std::collections::HashMap;

/// Resolves node aliases with a per-call cache
struct Aliases<'a> {
    store: &'a dyn GraphStore,
    cache: HashMap<NodeId, String>,
}

impl<'a> Aliases<'a> {
    fn new(store: &'a dyn GraphStore) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    fn get(&mut self, id: &NodeId) -> StorageResult<String> {
        if let Some(alias) = self.cache.get(id) {
            return Ok(alias.clone());
        }
        let alias = self
            .store
            .load_node(id)?
            .map(|n| n.alias)
            .unwrap_or_else(|| id.to_string());
        self.cache.insert(*id, alias.clone());
        Ok(alias)
    }

    fn view(&mut self, edge: Edge) -> StorageResult<EdgeView> {
        Ok(EdgeView {
            producer_alias: self.get(&edge.producer)?,
            consumer_alias: self.get(&edge.consumer)?,
            edge,
        })
    }
}

fn views(store: &dyn GraphStore, edges: Vec<Edge>) -> StorageResult<Vec<EdgeView>> {
    let mut aliases = Aliases::new(store);
    let mut views = edges
        .into_iter()
        .map(|edge| aliases.view(edge))
        .collect::<StorageResult<Vec<_>>>()?;
    views.sort_by(|a, b| {
        (&a.producer_alias, &a.edge.output_key, &a.consumer_alias)
            .cmp(&(&b.producer_alias, &b.edge.output_key, &b.consumer_alias))
    });
    Ok(views)
}

/// Incoming edges of `node`
pub fn dependencies(store: &dyn GraphStore, node: &NodeId) -> StorageResult<Vec<EdgeView>> {
    views(store, store.edges_to(node)?)
}

/// Outgoing edges of `node`
pub fn dependents(store: &dyn GraphStore, node: &NodeId) -> StorageResult<Vec<EdgeView>> {
    views(store, store.edges_from(node)?)
}

/// One edge with aliases
pub fn edge_view(store: &dyn GraphStore, edge: Edge) -> StorageResult<EdgeView> {
    Aliases::new(store).view(edge)
}

/// Every node exposing an output named `key`, sorted by alias
pub fn search_by_output_key(store: &dyn GraphStore, key: &str) -> StorageResult<Vec<OutputRef>> {
    let mut aliases = Aliases::new(store);
    let mut refs = store
        .search_outputs(key)?
        .into_iter()
        .map(|(node, key)| -> StorageResult<OutputRef> {
            Ok(OutputRef {
                alias: aliases.get(&node)?,
                node,
                key,
            })
        })
        .collect::<StorageResult<Vec<_>>>()?;
    refs.sort_by(|a, b| a.alias.cmp(&b.alias));
    Ok(refs)
}

/// Consumers of `(producer, key)`, deduplicated and sorted by alias
pub fn nodes_consuming(store: &dyn GraphStore, producer: &NodeId, key: &str) -> StorageResult<Vec<NodeSummary>> {
    let mut consumers: Vec<NodeSummary> = Vec::new();
    for edge in store.edges_for_output(producer, key)? {
        if consumers.iter().any(|c| c.id == edge.consumer) {
            continue;
        }
        if let Some(node) = store.load_node(&edge.consumer)? {
            consumers.push(node.summary());
        }
    }
    consumers.sort_by(|a, b| a.alias.cmp(&b.alias));
    Ok(consumers)
}
