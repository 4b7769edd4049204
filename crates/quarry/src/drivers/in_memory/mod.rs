//! In-memory store implementations.
//!
//! These back tests, the CLI, and single-process deployments. All data is
//! held in RAM behind `tokio::sync::RwLock` and is lost when the process
//! exits.

mod catalog;
mod olap;
mod registry;
mod repo;

pub use catalog::InMemoryCatalog;
pub use olap::{InMemoryOlap, Table};
pub use registry::InMemoryRegistry;
pub use repo::InMemoryRepo;
