//! Typed queries executed through the runtime's dispatcher.
//!
//! A query carries its input parameters, knows how to compute its result
//! against an [`OlapStore`], and exposes a result slot the dispatcher fills
//! on success. Adding a new kind of query means adding a type that
//! implements [`Query`]; the dispatcher does not change.
//!
//! # Lifecycle
//!
//! Construct per request, pass to
//! [`Runtime::query`](crate::runtime::Runtime::query) once, then read the
//! result. The slot stays `None` unless the dispatch succeeded.

mod table;

use crate::drivers::OlapStore;
use crate::error::Result;
use async_trait::async_trait;

pub use table::{ProfileColumn, TableCardinality, TableColumns, TableHead};

/// A query the dispatcher can run.
#[async_trait]
pub trait Query: Send + Sync {
    /// What [`Query::execute`] produces.
    type Output: Send;

    /// Short description for logs, e.g. `TableCardinality(orders)`.
    fn key(&self) -> String;

    /// Compute the result. Must not touch the result slot, so that a failed
    /// or abandoned execution leaves it unset.
    async fn execute(&self, olap: &dyn OlapStore) -> Result<Self::Output>;

    /// Store a successful result.
    fn set_result(&mut self, result: Self::Output);
}
