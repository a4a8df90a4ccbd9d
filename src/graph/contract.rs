//! Type contracts attached to node outputs

use super::node::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a contract came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractSource {
    /// Declared by a user; survives removal of the output
    Declared,
    /// Generated from a sample value; discarded with the output
    Inferred,
}

impl ContractSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Declared => "declared",
            Self::Inferred => "inferred",
        }
    }
}

impl std::str::FromStr for ContractSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "declared" => Ok(Self::Declared),
            "inferred" => Ok(Self::Inferred),
            other => Err(format!("unknown contract source: {}", other)),
        }
    }
}

/// Outcome of the last contract check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidityStatus {
    Valid,
    Invalid,
    /// The check itself failed (collaborator error or timeout)
    Error,
    #[default]
    Unchecked,
}

/// Result of the last validity check for one output
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Validity {
    pub status: ValidityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
    /// Node serial whose value was checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<u64>,
}

impl Validity {
    pub fn unchecked() -> Self {
        Self::default()
    }

    pub fn checked(status: ValidityStatus, detail: Option<String>, serial: u64) -> Self {
        Self {
            status,
            detail,
            checked_at: Some(Utc::now()),
            serial: Some(serial),
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.status == ValidityStatus::Invalid
    }

    pub fn is_error(&self) -> bool {
        self.status == ValidityStatus::Error
    }
}

/// A contract on `(node, output key)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputContract {
    pub node: NodeId,
    pub output_key: String,
    /// The contract document handed to the validator
    pub contract: Value,
    pub source: ContractSource,
    pub validity: Validity,
    pub created_at: DateTime<Utc>,
}

impl OutputContract {
    pub fn declared(node: NodeId, output_key: impl Into<String>, contract: Value) -> Self {
        Self::new(node, output_key, contract, ContractSource::Declared)
    }

    pub fn inferred(node: NodeId, output_key: impl Into<String>, contract: Value) -> Self {
        Self::new(node, output_key, contract, ContractSource::Inferred)
    }

    fn new(node: NodeId, output_key: impl Into<String>, contract: Value, source: ContractSource) -> Self {
        Self {
            node,
            output_key: output_key.into(),
            contract,
            source,
            validity: Validity::unchecked(),
            created_at: Utc::now(),
        }
    }

    pub fn with_validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }
}
