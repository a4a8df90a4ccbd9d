//! Layered topological ordering

use super::snapshot::GraphSnapshot;
use super::types::LayeredResult;
use crate::graph::{NodeId, NodeSummary};
use std::collections::{HashMap, HashSet, VecDeque};

/// Query for grouping nodes into dependency layers
///
/// Every node lands one layer after its deepest producer inside the
/// layered subgraph, so a layer only depends on earlier layers.
#[derive(Debug, Clone, Default)]
pub struct LayeredQuery {
    /// Layer only `root` and what is transitively downstream of it
    pub root: Option<NodeId>,
}

impl LayeredQuery {
    /// Layer the subgraph downstream of `root`
    pub fn from(root: NodeId) -> Self {
        Self { root: Some(root) }
    }

    /// Layer the whole graph
    pub fn all() -> Self {
        Self { root: None }
    }

    pub fn execute(&self, snapshot: &GraphSnapshot) -> LayeredResult {
        let mut result = LayeredResult {
            root: self.root,
            layers: Vec::new(),
        };
        let index = snapshot.index();

        let members: HashSet<NodeId> = match self.root {
            Some(root) => {
                if snapshot.node(&root).is_none() {
                    return result;
                }
                let mut seen = HashSet::from([root]);
                let mut queue = VecDeque::from([root]);
                while let Some(current) = queue.pop_front() {
                    for edge in index.outgoing(&current) {
                        if seen.insert(edge.consumer) {
                            queue.push_back(edge.consumer);
                        }
                    }
                }
                seen
            }
            None => snapshot.nodes().map(|n| n.id).collect(),
        };

        // Kahn's algorithm restricted to `members`, tracking longest path
        let mut indegree: HashMap<NodeId, usize> = members.iter().map(|id| (*id, 0)).collect();
        for id in &members {
            for edge in index.outgoing(id) {
                if let Some(d) = indegree.get_mut(&edge.consumer) {
                    *d += 1;
                }
            }
        }

        let mut depth: HashMap<NodeId, usize> = HashMap::new();
        let mut queue: VecDeque<NodeId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in &queue {
            depth.insert(*id, 0);
        }

        while let Some(current) = queue.pop_front() {
            let current_depth = depth.get(&current).copied().unwrap_or(0);
            for edge in index.outgoing(&current) {
                let Some(d) = indegree.get_mut(&edge.consumer) else {
                    continue;
                };
                let entry = depth.entry(edge.consumer).or_insert(0);
                *entry = (*entry).max(current_depth + 1);
                *d -= 1;
                if *d == 0 {
                    queue.push_back(edge.consumer);
                }
            }
        }

        let layer_count = depth.values().max().map(|m| m + 1).unwrap_or(0);
        let mut layers: Vec<Vec<NodeSummary>> = vec![Vec::new(); layer_count];
        for (id, d) in depth {
            if let Some(node) = snapshot.node(&id) {
                layers[d].push(node.clone());
            }
        }
        for layer in &mut layers {
            layer.sort_by(|a, b| a.alias.cmp(&b.alias).then(a.id.cmp(&b.id)));
        }
        result.layers = layers;
        result
    }
}
