//! Quarry - data-plane runtime for analytics projects.
//!
//! Holds a live catalog of artifacts (sources, models, metrics views) per
//! tenant instance, tracks the dependency graph between them, works out what
//! is stale after a definition changes, and runs profiling queries against
//! an OLAP engine with priority-ordered admission.
//!
//! The pieces, leaf first:
//! - [`dag`]: name normalization and the acyclic [`dag::DependencyGraph`]
//! - [`catalog`]: per-instance migration state, the reconciliation pass and
//!   the [`catalog::CatalogService`] read facade
//! - [`runtime`]: instances, cancellation contexts and the query dispatcher
//! - [`queries`]: typed profiling queries
//! - [`server`]: authorized request handlers

#![forbid(unsafe_code)]

// Public modules for library usage
pub mod catalog;
pub mod config;
pub mod dag;
pub mod domain;
pub mod drivers;
pub mod error;
pub mod queries;
pub mod runtime;
pub mod server;

// Public CLI module (needed by binary)
pub mod cli;
