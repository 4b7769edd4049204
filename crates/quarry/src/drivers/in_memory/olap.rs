//! `OlapStore` evaluating statements over in-memory tables.
//!
//! Every executed statement is appended to a log before evaluation so tests
//! can assert whether (and in which order) the engine was reached. An
//! optional per-statement latency simulates slow engines.

use crate::drivers::{ColumnSchema, OlapStore, Row, Rows, Statement};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;

/// A table: ordered schema plus rows keyed by column name.
#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Column schema in order
    pub schema: Vec<ColumnSchema>,

    /// Row data; missing keys read as NULL
    pub rows: Vec<Row>,
}

impl Table {
    /// Create an empty table with the given `(name, type)` columns.
    #[must_use]
    pub fn new(columns: &[(&str, &str)]) -> Self {
        Self {
            schema: columns
                .iter()
                .map(|(name, ty)| ColumnSchema::new(*name, *ty))
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row given as values in schema order.
    #[must_use]
    pub fn with_row(mut self, values: Vec<Value>) -> Self {
        let row = self
            .schema
            .iter()
            .map(|col| col.name.clone())
            .zip(values)
            .collect();
        self.rows.push(row);
        self
    }
}

/// Thread-safe in-memory OLAP engine.
#[derive(Debug, Default)]
pub struct InMemoryOlap {
    tables: RwLock<HashMap<String, Table>>,
    log: Mutex<Vec<Statement>>,
    latency: Option<Duration>,
}

impl InMemoryOlap {
    /// Create an engine with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every statement by `latency` before evaluating it.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Create or replace a table.
    pub async fn create_table(&self, name: impl Into<String>, table: Table) {
        self.tables.write().await.insert(name.into(), table);
    }

    /// Statements received so far, in arrival order.
    pub fn executed(&self) -> Vec<Statement> {
        self.log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of statements received so far.
    pub fn execution_count(&self) -> usize {
        self.log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn record(&self, statement: &Statement) {
        self.log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(statement.clone());
    }
}

fn count_row(count: usize) -> Rows {
    let mut row = Row::new();
    row.insert("count".to_string(), Value::from(count as u64));
    Rows {
        schema: vec![ColumnSchema::new("count", "BIGINT")],
        rows: vec![row],
    }
}

#[async_trait]
impl OlapStore for InMemoryOlap {
    fn dialect(&self) -> &'static str {
        "memory"
    }

    async fn execute(&self, statement: &Statement) -> Result<Rows> {
        self.record(statement);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let tables = self.tables.read().await;
        let table = tables.get(statement.table()).ok_or_else(|| {
            Error::Execution(format!("table '{}' does not exist", statement.table()))
        })?;

        match statement {
            Statement::CountRows { .. } => Ok(count_row(table.rows.len())),
            Statement::CountNulls { column, .. } => {
                if !table.schema.iter().any(|c| &c.name == column) {
                    return Err(Error::Execution(format!(
                        "column '{column}' does not exist in '{}'",
                        statement.table()
                    )));
                }
                let nulls = table
                    .rows
                    .iter()
                    .filter(|row| row.get(column).is_none_or(Value::is_null))
                    .count();
                Ok(count_row(nulls))
            }
            Statement::Sample { limit, .. } => Ok(Rows {
                schema: table.schema.clone(),
                rows: table.rows.iter().take(*limit).cloned().collect(),
            }),
            Statement::Describe { .. } => Ok(Rows {
                schema: vec![
                    ColumnSchema::new("name", "VARCHAR"),
                    ColumnSchema::new("type", "VARCHAR"),
                ],
                rows: table
                    .schema
                    .iter()
                    .map(|col| {
                        let mut row = Row::new();
                        row.insert("name".to_string(), Value::from(col.name.clone()));
                        row.insert("type".to_string(), Value::from(col.data_type.clone()));
                        row
                    })
                    .collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn people() -> InMemoryOlap {
        let olap = InMemoryOlap::new();
        olap.create_table(
            "people",
            Table::new(&[("name", "VARCHAR"), ("age", "INTEGER")])
                .with_row(vec![json!("ada"), json!(36)])
                .with_row(vec![json!("bob"), Value::Null])
                .with_row(vec![json!("cy"), json!(7)]),
        )
        .await;
        olap
    }

    #[tokio::test]
    async fn test_count_rows_and_nulls() {
        let olap = people().await;

        let rows = olap
            .execute(&Statement::CountRows { table: "people".into() })
            .await
            .unwrap();
        assert_eq!(rows.scalar_u64().unwrap(), 3);

        let nulls = olap
            .execute(&Statement::CountNulls {
                table: "people".into(),
                column: "age".into(),
            })
            .await
            .unwrap();
        assert_eq!(nulls.scalar_u64().unwrap(), 1);
        assert_eq!(olap.execution_count(), 2);
    }

    #[tokio::test]
    async fn test_sample_respects_limit() {
        let olap = people().await;
        let rows = olap
            .execute(&Statement::Sample {
                table: "people".into(),
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 2);
        assert_eq!(rows.rows[0]["name"], json!("ada"));
    }

    #[tokio::test]
    async fn test_unknown_table_is_execution_error() {
        let olap = people().await;
        let err = olap
            .execute(&Statement::Describe { table: "nope".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        // The attempt is still logged
        assert_eq!(olap.executed().len(), 1);
    }
}
