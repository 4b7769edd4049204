//! Error types for quarry runtime operations.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a query stopped before it completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The caller cancelled the request.
    Cancelled,

    /// The caller's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Cancelled => write!(f, "cancelled by caller"),
            CancelCause::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// The error type for quarry runtime operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An entry, node, instance, table or path is absent.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// What kind of thing was looked up (e.g. "instance", "table").
        kind: &'static str,
        /// The name that was looked up.
        name: String,
    },

    /// Inserting `parent -> child` would close a cycle in the dependency graph.
    #[error("circular dependency: '{child}' cannot depend on '{parent}' because '{parent}' already depends on '{child}'")]
    Cycle {
        /// The dependency side of the rejected edge.
        parent: String,
        /// The dependent side of the rejected edge.
        child: String,
    },

    /// The caller lacks the permission required for the action.
    #[error("action not allowed")]
    Forbidden,

    /// The OLAP engine failed to execute a query.
    #[error("query execution failed: {0}")]
    Execution(String),

    /// The caller's cancellation or deadline fired before completion.
    #[error("query {0}")]
    Cancelled(CancelCause),

    /// The priority is outside the accepted range.
    #[error("invalid priority {0}")]
    InvalidPriority(i64),

    /// No OLAP slot became available within the admission timeout.
    #[error("timed out after {waited:?} waiting for an OLAP slot on instance '{instance_id}'")]
    AdmissionTimeout {
        /// The instance whose slots were exhausted.
        instance_id: String,
        /// How long the query waited.
        waited: Duration,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A repository artifact could not be parsed.
    #[error("invalid artifact {}: {reason}", path.display())]
    InvalidArtifact {
        /// Path of the artifact in the repository.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A backing store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`].
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Returns true when the error was caused by the caller's own
    /// cancellation or deadline rather than a system failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

/// A specialized Result type for quarry operations.
pub type Result<T> = std::result::Result<T, Error>;
