//! Storage backends for stategraph
//!
//! The engine talks to persistence through the `GraphStore` trait.
//! The shipped implementation is `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{AddEdgeOutcome, CommitOutcome, GraphStore, OpenStore, StorageError, StorageResult};
