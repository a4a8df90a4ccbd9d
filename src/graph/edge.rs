//! Edge representation: one consumer's dependency on one producer output

use super::contract::Validity;
use super::fingerprint::Fingerprint;
use super::node::NodeId;
use super::status::{derive, Status, StatusInputs};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(Uuid);

impl EdgeId {
    /// Create a new random EdgeId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EdgeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// When the edge last entered each condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeTimestamps {
    pub created_at: DateTime<Utc>,
    /// Last time `status` changed value
    pub status_changed_at: DateTime<Utc>,
    /// Last recorded observation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
    /// When the current drift began; cleared once observed again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drifted_at: Option<DateTime<Utc>>,
    /// When the output disappeared; cleared once it returns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_since: Option<DateTime<Utc>>,
}

impl EdgeTimestamps {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            status_changed_at: now,
            observed_at: None,
            drifted_at: None,
            missing_since: None,
        }
    }
}

/// A directed dependency `(producer, output_key) -> consumer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub producer: NodeId,
    pub output_key: String,
    pub consumer: NodeId,
    /// Name under which the consumer refers to this input; unique per consumer
    pub local_name: String,
    /// Derived; see [`Edge::refresh_status`]
    pub status: Status,
    /// Fingerprint of the producer's current value, `None` while absent
    pub producer_fingerprint: Option<Fingerprint>,
    /// Fingerprint the consumer last observed, `None` until first observation
    pub observed_fingerprint: Option<Fingerprint>,
    /// Placeholder used until the real output first appears
    pub mock_value: Option<Value>,
    /// Snapshot of the producer output's contract validity
    pub validity: Validity,
    pub timestamps: EdgeTimestamps,
}

impl Edge {
    /// Create a fresh edge with no observation history.
    ///
    /// The status is derived immediately from the supplied producer state.
    pub fn new(
        producer: NodeId,
        output_key: impl Into<String>,
        consumer: NodeId,
        local_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let mut edge = Self {
            id: EdgeId::new(),
            producer,
            output_key: output_key.into(),
            consumer,
            local_name: local_name.into(),
            status: Status::Pending,
            producer_fingerprint: None,
            observed_fingerprint: None,
            mock_value: None,
            validity: Validity::unchecked(),
            timestamps: EdgeTimestamps::new(now),
        };
        edge.refresh_status();
        edge
    }

    pub fn with_mock(mut self, value: Value) -> Self {
        if self.producer_fingerprint.is_none() {
            self.mock_value = Some(value);
        }
        self.refresh_status();
        self
    }

    pub fn is_mock(&self) -> bool {
        self.mock_value.is_some()
    }

    /// The fingerprint a consumer sees through this edge right now:
    /// the real output if present, otherwise the mock placeholder.
    pub fn effective_fingerprint(&self) -> Option<Fingerprint> {
        match (&self.producer_fingerprint, &self.mock_value) {
            (Some(fp), _) => Some(fp.clone()),
            (None, Some(mock)) => Some(Fingerprint::of(mock)),
            (None, None) => None,
        }
    }

    /// Apply the producer's current value (or its absence).
    ///
    /// A real value replaces any mock placeholder for good.
    pub fn set_producer_state(&mut self, fingerprint: Option<Fingerprint>, validity: Validity) {
        let now = Utc::now();
        match &fingerprint {
            Some(_) => {
                self.mock_value = None;
                self.timestamps.missing_since = None;
            }
            None if self.timestamps.missing_since.is_none() && !self.is_mock() => {
                self.timestamps.missing_since = Some(now);
            }
            None => {}
        }
        self.producer_fingerprint = fingerprint;
        self.validity = validity;
        self.refresh_status();
    }

    /// Record that the consumer committed a write built from `fingerprint`.
    pub fn observe(&mut self, fingerprint: Fingerprint) {
        self.observed_fingerprint = Some(fingerprint);
        self.timestamps.observed_at = Some(Utc::now());
        self.refresh_status();
    }

    /// Re-derive `status` from the edge's own fields.
    pub fn refresh_status(&mut self) {
        let status = derive(StatusInputs {
            output_exists: self.producer_fingerprint.is_some(),
            producer_fingerprint: self.producer_fingerprint.as_ref(),
            observed_fingerprint: self.observed_fingerprint.as_ref(),
            is_mock: self.is_mock(),
            validity: &self.validity,
        });

        let now = Utc::now();
        if status.is_dirty() {
            if self.timestamps.drifted_at.is_none() {
                self.timestamps.drifted_at = Some(now);
            }
        } else if status.is_clean() {
            self.timestamps.drifted_at = None;
        }

        if status != self.status {
            self.status = status;
            self.timestamps.status_changed_at = now;
        }
    }
}

/// Request to add an edge
#[derive(Debug, Clone)]
pub struct EdgeDeclaration {
    pub producer: NodeId,
    pub output_key: String,
    pub consumer: NodeId,
    /// Explicit local name; derived from producer alias and key when `None`
    pub local_name: Option<String>,
    /// Placeholder used until the output exists
    pub mock_value: Option<Value>,
}

impl EdgeDeclaration {
    pub fn new(producer: NodeId, output_key: impl Into<String>, consumer: NodeId) -> Self {
        Self {
            producer,
            output_key: output_key.into(),
            consumer,
            local_name: None,
            mock_value: None,
        }
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    pub fn with_mock(mut self, value: Value) -> Self {
        self.mock_value = Some(value);
        self
    }
}

/// Deterministic default local name: `<alias>_<key>` with every
/// non-alphanumeric character replaced by `_`.
pub fn default_local_name(producer_alias: &str, output_key: &str) -> String {
    format!("{}_{}", producer_alias, output_key)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::contract::ValidityStatus;
    use serde_json::json;

    fn edge() -> Edge {
        Edge::new(NodeId::new(), "vpc_id", NodeId::new(), "net_vpc_id")
    }

    #[test]
    fn new_edge_without_output_is_missing() {
        assert_eq!(edge().status, Status::MissingOutput);
    }

    #[test]
    fn mock_edge_until_real_output() {
        let mut e = edge().with_mock(json!("vpc-mock"));
        assert_eq!(e.status, Status::Mock);
        assert_eq!(e.effective_fingerprint(), Some(Fingerprint::of(&json!("vpc-mock"))));

        e.set_producer_state(Some(Fingerprint::of(&json!("vpc-111"))), Validity::unchecked());
        assert!(!e.is_mock());
        assert_eq!(e.status, Status::Pending);
    }

    #[test]
    fn observed_mock_value_drifts_to_real() {
        let mut e = edge().with_mock(json!("vpc-mock"));
        let fp = e.effective_fingerprint().unwrap();
        e.observe(fp);
        assert_eq!(e.status, Status::Mock);

        e.set_producer_state(Some(Fingerprint::of(&json!("vpc-111"))), Validity::unchecked());
        assert_eq!(e.status, Status::Dirty);
        assert!(e.timestamps.drifted_at.is_some());
    }

    #[test]
    fn mock_ignored_when_output_exists() {
        let mut e = edge();
        e.set_producer_state(Some(Fingerprint::of(&json!("vpc-111"))), Validity::unchecked());
        let e = e.with_mock(json!("vpc-mock"));
        assert!(!e.is_mock());
        assert_eq!(e.status, Status::Pending);
    }

    #[test]
    fn observation_clears_drift_timestamp() {
        let fp1 = Fingerprint::of(&json!(1));
        let fp2 = Fingerprint::of(&json!(2));
        let mut e = edge();
        e.set_producer_state(Some(fp1.clone()), Validity::unchecked());
        e.observe(fp1);
        assert_eq!(e.status, Status::Clean);

        e.set_producer_state(Some(fp2.clone()), Validity::checked(ValidityStatus::Invalid, None, 2));
        assert_eq!(e.status, Status::DirtyInvalid);
        assert!(e.timestamps.drifted_at.is_some());

        e.observe(fp2);
        assert_eq!(e.status, Status::CleanInvalid);
        assert!(e.timestamps.drifted_at.is_none());
    }

    #[test]
    fn missing_since_tracks_removal() {
        let mut e = edge();
        e.set_producer_state(Some(Fingerprint::of(&json!(1))), Validity::unchecked());
        assert!(e.timestamps.missing_since.is_none());
        e.set_producer_state(None, Validity::unchecked());
        assert_eq!(e.status, Status::MissingOutput);
        assert!(e.timestamps.missing_since.is_some());
    }

    #[test]
    fn default_local_name_is_sanitized() {
        assert_eq!(default_local_name("core-net", "vpc.id"), "core_net_vpc_id");
    }
}
