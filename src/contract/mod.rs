//! Type-contract collaborators
//!
//! The engine only depends on the `ContractValidator` and
//! `ContractInferrer` traits; `ShapeContracts` is the built-in default.

mod shape;
mod traits;

pub use shape::ShapeContracts;
pub use traits::{ContractError, ContractInferrer, ContractValidator, ValidationOutcome};
