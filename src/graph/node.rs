//! Node representation: a unit of infrastructure state exposing named outputs

use super::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique, immutable identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Create a new random NodeId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a NodeId from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A single named output: its value and the fingerprint of that value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub value: Value,
    pub fingerprint: Fingerprint,
}

impl Output {
    /// Wrap a value, computing its fingerprint
    pub fn new(value: Value) -> Self {
        let fingerprint = Fingerprint::of(&value);
        Self { value, fingerprint }
    }
}

/// Output map keyed by output name
pub type Outputs = BTreeMap<String, Output>;

/// A node in the dependency graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier
    pub id: NodeId,
    /// Human-chosen name, unique across the graph
    pub alias: String,
    /// Strictly increasing on every content write; 0 until the first write
    pub serial: u64,
    /// Current outputs
    pub outputs: Outputs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a new, never-written node
    pub fn new(alias: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::new(),
            alias: alias.into(),
            serial: 0,
            outputs: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn output(&self, key: &str) -> Option<&Output> {
        self.outputs.get(key)
    }

    pub fn has_output(&self, key: &str) -> bool {
        self.outputs.contains_key(key)
    }

    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            id: self.id,
            alias: self.alias.clone(),
            serial: self.serial,
        }
    }
}

/// Lightweight reference to a node, used in query results
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub alias: String,
    pub serial: u64,
}

/// A content write delivered by the upload path
#[derive(Debug, Clone)]
pub struct NodeWrite {
    pub node: NodeId,
    pub serial: u64,
    pub outputs: BTreeMap<String, Value>,
}

impl NodeWrite {
    pub fn new(node: NodeId, serial: u64) -> Self {
        Self {
            node,
            serial,
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }

    /// Fingerprint every output value
    pub fn fingerprinted(&self) -> Outputs {
        self.outputs
            .iter()
            .map(|(k, v)| (k.clone(), Output::new(v.clone())))
            .collect()
    }
}
