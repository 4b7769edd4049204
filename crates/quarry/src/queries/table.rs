//! Table-level profiling queries.

use super::Query;
use crate::drivers::{OlapStore, Row, Statement};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

/// Row count of a table.
#[derive(Debug, Clone, Default)]
pub struct TableCardinality {
    /// Table to count
    pub table_name: String,

    /// Row count, set on success
    pub result: Option<u64>,
}

impl TableCardinality {
    /// A query for `table_name`.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            result: None,
        }
    }
}

#[async_trait]
impl Query for TableCardinality {
    type Output = u64;

    fn key(&self) -> String {
        format!("TableCardinality({})", self.table_name)
    }

    async fn execute(&self, olap: &dyn OlapStore) -> Result<u64> {
        olap.execute(&Statement::CountRows {
            table: self.table_name.clone(),
        })
        .await?
        .scalar_u64()
    }

    fn set_result(&mut self, result: u64) {
        self.result = Some(result);
    }
}

/// Profile of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileColumn {
    /// Column name
    pub name: String,

    /// Engine type name
    #[serde(rename = "type")]
    pub data_type: String,

    /// Number of NULL values
    pub unknown_count: u64,
}

/// Column names, types and NULL counts of a table.
#[derive(Debug, Clone, Default)]
pub struct TableColumns {
    /// Table to profile
    pub table_name: String,

    /// Columns in table order, set on success
    pub result: Option<Vec<ProfileColumn>>,
}

impl TableColumns {
    /// A query for `table_name`.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            result: None,
        }
    }
}

fn string_field(row: &Row, field: &str) -> Result<String> {
    row.get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Execution(format!("describe result is missing '{field}'")))
}

#[async_trait]
impl Query for TableColumns {
    type Output = Vec<ProfileColumn>;

    fn key(&self) -> String {
        format!("TableColumns({})", self.table_name)
    }

    async fn execute(&self, olap: &dyn OlapStore) -> Result<Vec<ProfileColumn>> {
        let described = olap
            .execute(&Statement::Describe {
                table: self.table_name.clone(),
            })
            .await?;

        let columns = described
            .rows
            .iter()
            .map(|row| Ok((string_field(row, "name")?, string_field(row, "type")?)))
            .collect::<Result<Vec<_>>>()?;

        try_join_all(columns.into_iter().map(|(name, data_type)| async move {
            let unknown_count = olap
                .execute(&Statement::CountNulls {
                    table: self.table_name.clone(),
                    column: name.clone(),
                })
                .await?
                .scalar_u64()?;
            Ok::<_, Error>(ProfileColumn {
                name,
                data_type,
                unknown_count,
            })
        }))
        .await
    }

    fn set_result(&mut self, result: Vec<ProfileColumn>) {
        self.result = Some(result);
    }
}

/// The first rows of a table.
///
/// `limit` is used as given; callers apply any default before dispatch.
#[derive(Debug, Clone, Default)]
pub struct TableHead {
    /// Table to read
    pub table_name: String,

    /// Maximum rows returned
    pub limit: usize,

    /// Sampled rows, set on success
    pub result: Option<Vec<Row>>,
}

impl TableHead {
    /// A query for up to `limit` rows of `table_name`.
    pub fn new(table_name: impl Into<String>, limit: usize) -> Self {
        Self {
            table_name: table_name.into(),
            limit,
            result: None,
        }
    }
}

#[async_trait]
impl Query for TableHead {
    type Output = Vec<Row>;

    fn key(&self) -> String {
        format!("TableHead({}, {})", self.table_name, self.limit)
    }

    async fn execute(&self, olap: &dyn OlapStore) -> Result<Vec<Row>> {
        let rows = olap
            .execute(&Statement::Sample {
                table: self.table_name.clone(),
                limit: self.limit,
            })
            .await?;
        Ok(rows.rows)
    }

    fn set_result(&mut self, result: Vec<Row>) {
        self.result = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::in_memory::{InMemoryOlap, Table};
    use serde_json::{Value, json};

    async fn olap() -> InMemoryOlap {
        let olap = InMemoryOlap::new();
        olap.create_table(
            "orders",
            Table::new(&[("id", "BIGINT"), ("country", "VARCHAR")])
                .with_row(vec![json!(1), json!("NZ")])
                .with_row(vec![json!(2), Value::Null])
                .with_row(vec![json!(3), Value::Null]),
        )
        .await;
        olap
    }

    #[tokio::test]
    async fn test_cardinality() {
        let olap = olap().await;
        let q = TableCardinality::new("orders");
        assert_eq!(q.execute(&olap).await.unwrap(), 3);
        // execute alone never fills the slot
        assert!(q.result.is_none());
    }

    #[tokio::test]
    async fn test_columns_in_table_order() {
        let olap = olap().await;
        let columns = TableColumns::new("orders").execute(&olap).await.unwrap();
        assert_eq!(
            columns,
            vec![
                ProfileColumn {
                    name: "id".into(),
                    data_type: "BIGINT".into(),
                    unknown_count: 0,
                },
                ProfileColumn {
                    name: "country".into(),
                    data_type: "VARCHAR".into(),
                    unknown_count: 2,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_head_uses_limit_verbatim() {
        let olap = olap().await;
        let rows = TableHead::new("orders", 2).execute(&olap).await.unwrap();
        assert_eq!(rows.len(), 2);

        let none = TableHead::new("orders", 0).execute(&olap).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_missing_table_is_execution_error() {
        let olap = olap().await;
        let err = TableColumns::new("ghost").execute(&olap).await.unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }
}
