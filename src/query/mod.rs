//! Query system for the dependency graph
//!
//! Layered ordering and node aggregation run against a [`GraphSnapshot`];
//! edge views and output search read the store directly.

mod aggregate;
mod lookup;
mod snapshot;
mod topo;
mod types;

pub use aggregate::StatusQuery;
pub use lookup::{dependencies, dependents, edge_view, nodes_consuming, search_by_output_key};
pub use snapshot::GraphSnapshot;
pub use topo::LayeredQuery;
pub use types::{EdgeView, IncomingStatus, LayeredResult, NodeStatusReport, OutputRef};
