//! Cycle guard: reachability check run before every edge insert

use super::node::NodeId;
use std::collections::{HashMap, HashSet, VecDeque};

/// Successor links `producer -> consumers`, deduplicated
#[derive(Debug, Default)]
pub struct Adjacency {
    successors: HashMap<NodeId, HashSet<NodeId>>,
}

impl Adjacency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_links(links: impl IntoIterator<Item = (NodeId, NodeId)>) -> Self {
        let mut adjacency = Self::new();
        for (producer, consumer) in links {
            adjacency.link(producer, consumer);
        }
        adjacency
    }

    pub fn link(&mut self, producer: NodeId, consumer: NodeId) {
        self.successors.entry(producer).or_default().insert(consumer);
    }

    pub fn successors(&self, node: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.successors.get(node).into_iter().flatten()
    }

    /// Breadth-first search for a path `from -> ... -> to`.
    ///
    /// Returns the node sequence including both ends.
    pub fn path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        if from == to {
            return Some(vec![from]);
        }

        let mut parents: HashMap<NodeId, NodeId> = HashMap::new();
        let mut visited: HashSet<NodeId> = HashSet::from([from]);
        let mut queue: VecDeque<NodeId> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            for next in self.successors(&current) {
                if !visited.insert(*next) {
                    continue;
                }
                parents.insert(*next, current);
                if *next == to {
                    let mut path = vec![to];
                    let mut cursor = to;
                    while let Some(parent) = parents.get(&cursor) {
                        path.push(*parent);
                        cursor = *parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(*next);
            }
        }
        None
    }

    /// The cycle that adding `producer -> consumer` would close, if any.
    ///
    /// The returned path starts and ends at `producer`:
    /// `producer -> consumer -> ... -> producer`.
    pub fn cycle_if_linked(&self, producer: NodeId, consumer: NodeId) -> Option<Vec<NodeId>> {
        let back = self.path(consumer, producer)?;
        let mut cycle = Vec::with_capacity(back.len() + 1);
        cycle.push(producer);
        if producer != consumer {
            cycle.extend(back);
        } else {
            cycle.push(producer);
        }
        Some(cycle)
    }

    pub fn has_cycle(&self) -> bool {
        // Kahn: a DAG drains completely.
        let mut indegree: HashMap<NodeId, usize> = HashMap::new();
        for (producer, consumers) in &self.successors {
            indegree.entry(*producer).or_insert(0);
            for consumer in consumers {
                *indegree.entry(*consumer).or_insert(0) += 1;
            }
        }
        let mut ready: Vec<NodeId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut drained = 0;
        while let Some(node) = ready.pop() {
            drained += 1;
            for next in self.successors(&node) {
                if let Some(d) = indegree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(*next);
                    }
                }
            }
        }
        drained != indegree.len()
    }
}
