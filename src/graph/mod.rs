//! Core graph data structures

mod contract;
mod cycle;
mod edge;
mod fingerprint;
mod node;
mod status;


pub use contract::{ContractSource, OutputContract, Validity, ValidityStatus};
pub use cycle::Adjacency;
pub use edge::{default_local_name, Edge, EdgeDeclaration, EdgeId, EdgeTimestamps};
pub use fingerprint::Fingerprint;
pub use node::{Node, NodeId, NodeSummary, NodeWrite, Output, Outputs};
pub use status::{aggregate, derive, Status, StatusInputs};
