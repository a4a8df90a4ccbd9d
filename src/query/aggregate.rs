//! Node aggregate status, computed on read

use super::snapshot::{EdgeIndex, GraphSnapshot};
use super::types::{IncomingStatus, NodeStatusReport};
use crate::graph::{aggregate, NodeId, Status};
use std::collections::HashMap;

/// Memoized aggregation over one snapshot.
///
/// A node's aggregate depends on its producers' aggregates, so producers
/// are resolved first; each node is computed at most once per query.
pub struct StatusQuery<'a> {
    snapshot: &'a GraphSnapshot,
    index: EdgeIndex<'a>,
    memo: HashMap<NodeId, Status>,
}

impl<'a> StatusQuery<'a> {
    pub fn new(snapshot: &'a GraphSnapshot) -> Self {
        Self {
            snapshot,
            index: snapshot.index(),
            memo: HashMap::new(),
        }
    }

    /// Aggregate status of `node`
    pub fn status_of(&mut self, node: NodeId) -> Status {
        if let Some(status) = self.memo.get(&node) {
            return *status;
        }

        // Iterative post-order so deep chains do not grow the call stack
        let mut stack: Vec<(NodeId, bool)> = vec![(node, false)];
        while let Some((current, expanded)) = stack.pop() {
            if self.memo.contains_key(&current) {
                continue;
            }
            if !expanded {
                stack.push((current, true));
                for edge in self.index.incoming(&current) {
                    if !self.memo.contains_key(&edge.producer) {
                        stack.push((edge.producer, false));
                    }
                }
                continue;
            }

            let incoming = self.index.incoming(&current);
            let statuses: Vec<Status> = incoming.iter().map(|e| e.status).collect();
            let upstream_stale = incoming.iter().any(|e| {
                e.status.is_clean()
                    && self
                        .memo
                        .get(&e.producer)
                        .is_some_and(|s| s.taints_downstream())
            });
            self.memo.insert(current, aggregate(&statuses, upstream_stale));
        }

        self.memo.get(&node).copied().unwrap_or(Status::Clean)
    }

    /// Aggregate status plus the incoming edges it came from.
    ///
    /// `None` if the node is not in the snapshot.
    pub fn report(&mut self, node: NodeId) -> Option<NodeStatusReport> {
        let summary = self.snapshot.node(&node)?.clone();
        let status = self.status_of(node);

        let mut incoming: Vec<IncomingStatus> = self
            .index
            .incoming(&node)
            .iter()
            .map(|edge| IncomingStatus {
                edge: edge.id,
                producer: edge.producer,
                producer_alias: self.snapshot.alias(&edge.producer),
                output_key: edge.output_key.clone(),
                local_name: edge.local_name.clone(),
                status: edge.status,
                producer_status: self.memo.get(&edge.producer).copied().unwrap_or(Status::Clean),
            })
            .collect();
        incoming.sort_by(|a, b| a.local_name.cmp(&b.local_name));

        Some(NodeStatusReport {
            node: summary,
            status,
            incoming,
        })
    }

    /// Aggregate status of every node in the snapshot
    pub fn all(&mut self) -> HashMap<NodeId, Status> {
        let ids: Vec<NodeId> = self.snapshot.nodes().map(|n| n.id).collect();
        ids.into_iter().map(|id| (id, self.status_of(id))).collect()
    }
}
