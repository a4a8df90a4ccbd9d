//! Per-node advisory locks

use crate::graph::NodeId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily-created async mutex per node.
///
/// Serializes writes and recomputation of one node; unrelated nodes
/// live in different shards and never contend.
#[derive(Debug, Default)]
pub struct NodeLocks {
    locks: DashMap<NodeId, Arc<Mutex<()>>>,
}

impl NodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, node: NodeId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard guard is dropped before awaiting
        let mutex = self.locks.entry(node).or_default().clone();
        mutex.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
