//! Contracts the runtime consumes from its external stores.
//!
//! Four stores back each instance:
//!
//! - [`CatalogStore`]: persisted catalog entries
//! - [`RepoStore`]: artifact definition files
//! - [`OlapStore`]: analytical query execution
//! - [`RegistryStore`]: the instance registry
//!
//! All traits are object-safe and used as `Arc<dyn ...>`. In-memory
//! implementations live in [`in_memory`]; [`file_repo`] serves artifacts from
//! a directory on disk.

use crate::domain::{CatalogEntry, Instance, ObjectType};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod file_repo;
pub mod in_memory;

/// Persisted catalog entries, partitioned by instance.
///
/// Implementations never store `parents`/`children`; callers enrich entries
/// from the dependency graph after reading.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// All entries of `object_type` for the instance, sorted by name.
    async fn find_entries(
        &self,
        instance_id: &str,
        object_type: ObjectType,
    ) -> Result<Vec<CatalogEntry>>;

    /// Every entry for the instance, sorted by name.
    async fn find_all_entries(&self, instance_id: &str) -> Result<Vec<CatalogEntry>>;

    /// Look up one entry by name (case-insensitive). `None` if absent.
    async fn find_entry(&self, instance_id: &str, name: &str) -> Result<Option<CatalogEntry>>;

    /// Persist a new entry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if an entry with the same name exists.
    async fn create_entry(&self, instance_id: &str, entry: CatalogEntry) -> Result<()>;

    /// Replace an existing entry.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the entry doesn't exist.
    async fn update_entry(&self, instance_id: &str, entry: CatalogEntry) -> Result<()>;

    /// Delete an entry. Deleting an absent entry is a no-op.
    async fn delete_entry(&self, instance_id: &str, name: &str) -> Result<()>;
}

/// Artifact definitions for an instance.
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Repository-relative paths of every artifact file, sorted.
    async fn list(&self, instance_id: &str) -> Result<Vec<PathBuf>>;

    /// Contents of one artifact file.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the path doesn't exist.
    async fn get(&self, instance_id: &str, path: &Path) -> Result<String>;

    /// Last modification time of an artifact file.
    async fn stat(&self, instance_id: &str, path: &Path) -> Result<DateTime<Utc>>;
}

/// Registered runtime instances.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// All instances, sorted by id.
    async fn find_instances(&self) -> Result<Vec<Instance>>;

    /// One instance by id. `None` if absent.
    async fn find_instance(&self, instance_id: &str) -> Result<Option<Instance>>;

    /// Register an instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the id is taken.
    async fn create_instance(&self, instance: Instance) -> Result<()>;

    /// Remove an instance. Removing an absent instance is a no-op.
    async fn delete_instance(&self, instance_id: &str) -> Result<()>;
}

/// An analytical operation the OLAP engine runs for a query.
///
/// The runtime never builds free-form SQL; each variant is one primitive a
/// profiling query needs. SQL-speaking drivers render them with
/// [`Statement::to_sql`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Statement {
    /// Number of rows in a table
    CountRows {
        /// Table to count
        table: String,
    },

    /// Number of NULL values in one column
    CountNulls {
        /// Table to scan
        table: String,
        /// Column to inspect
        column: String,
    },

    /// Up to `limit` rows from a table
    Sample {
        /// Table to read
        table: String,
        /// Maximum rows returned
        limit: usize,
    },

    /// Column names and types of a table
    Describe {
        /// Table to describe
        table: String,
    },
}

impl Statement {
    /// The table the statement reads.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Statement::CountRows { table }
            | Statement::CountNulls { table, .. }
            | Statement::Sample { table, .. }
            | Statement::Describe { table } => table,
        }
    }

    /// Render as DuckDB-flavoured SQL with quoted identifiers.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Statement::CountRows { table } => {
                format!("SELECT count(*) AS count FROM {}", quote_ident(table))
            }
            Statement::CountNulls { table, column } => format!(
                "SELECT count(*) AS count FROM {} WHERE {} IS NULL",
                quote_ident(table),
                quote_ident(column)
            ),
            Statement::Sample { table, limit } => {
                format!("SELECT * FROM {} LIMIT {limit}", quote_ident(table))
            }
            Statement::Describe { table } => format!(
                "SELECT column_name AS name, data_type AS type FROM information_schema.columns \
                 WHERE table_name = '{}' ORDER BY ordinal_position",
                table.replace('\'', "''")
            ),
        }
    }
}

/// Quote an identifier, doubling embedded double quotes.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Tabular result of a [`Statement`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rows {
    /// Result schema, in column order
    pub schema: Vec<ColumnSchema>,

    /// Result rows
    pub rows: Vec<Row>,
}

impl Rows {
    /// Read a single non-negative integer from the first column of the first row.
    ///
    /// # Errors
    ///
    /// Returns `Error::Execution` if the result is not a single integer.
    pub fn scalar_u64(&self) -> Result<u64> {
        let value = self
            .schema
            .first()
            .and_then(|col| self.rows.first().and_then(|row| row.get(&col.name)))
            .ok_or_else(|| crate::error::Error::Execution("expected a scalar result".to_string()))?;

        value.as_u64().ok_or_else(|| {
            crate::error::Error::Execution(format!("expected a non-negative integer, got {value}"))
        })
    }
}

/// Name and type of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name
    pub name: String,

    /// Engine type name (e.g. "VARCHAR", "BIGINT")
    #[serde(rename = "type")]
    pub data_type: String,
}

impl ColumnSchema {
    /// Create a column schema.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Analytical query execution for one instance.
///
/// Connection pooling and statement concurrency belong to the driver; the
/// runtime only decides admission order.
#[async_trait]
pub trait OlapStore: Send + Sync {
    /// Driver name (e.g. "duckdb", "memory").
    fn dialect(&self) -> &'static str;

    /// Run one statement.
    ///
    /// Dropping the returned future must abort the work or discard its
    /// result.
    ///
    /// # Errors
    ///
    /// Returns `Error::Execution` if the engine rejects or fails the statement.
    async fn execute(&self, statement: &Statement) -> Result<Rows>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statement_sql_quotes_identifiers() {
        let stmt = Statement::CountNulls {
            table: "my \"odd\" table".to_string(),
            column: "amount".to_string(),
        };
        assert_eq!(
            stmt.to_sql(),
            r#"SELECT count(*) AS count FROM "my ""odd"" table" WHERE "amount" IS NULL"#
        );
    }

    #[test]
    fn test_sample_sql_has_limit() {
        let stmt = Statement::Sample {
            table: "orders".to_string(),
            limit: 25,
        };
        assert_eq!(stmt.to_sql(), r#"SELECT * FROM "orders" LIMIT 25"#);
        assert_eq!(stmt.table(), "orders");
    }

    #[test]
    fn test_scalar_u64() {
        let mut row = Row::new();
        row.insert("count".to_string(), json!(42));
        let rows = Rows {
            schema: vec![ColumnSchema::new("count", "BIGINT")],
            rows: vec![row],
        };
        assert_eq!(rows.scalar_u64().unwrap(), 42);

        assert!(Rows::default().scalar_u64().is_err());
    }
}
