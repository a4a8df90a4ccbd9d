//! Collaborator traits for contract validation and inference

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by contract collaborators
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Malformed contract: {0}")]
    Malformed(String),
}

/// What a validator concluded about one value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    /// The value does not satisfy the contract
    Invalid(String),
    /// The check could not be carried out
    Error(String),
}

/// Checks a value against a contract document
///
/// Called inline with every write for outputs that carry a contract, under
/// a timeout. Implementations should not block the executor.
///
/// # Example
///
/// ```ignore
/// struct AlwaysValid;
///
/// #[async_trait]
/// impl ContractValidator for AlwaysValid {
///     async fn validate(&self, _contract: &Value, _value: &Value) -> ValidationOutcome {
///         ValidationOutcome::Valid
///     }
/// }
/// ```
#[async_trait]
pub trait ContractValidator: Send + Sync {
    async fn validate(&self, contract: &Value, value: &Value) -> ValidationOutcome;
}

/// Generates a contract from a sample value
///
/// Invoked in the background, only for outputs with no contract.
#[async_trait]
pub trait ContractInferrer: Send + Sync {
    async fn infer(&self, sample: &Value) -> Result<Value, ContractError>;
}
