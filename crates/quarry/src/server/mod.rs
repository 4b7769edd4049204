//! Request handlers over the runtime.
//!
//! Each handler checks the caller's [`Claims`] first, builds the typed query
//! and dispatches it through [`Runtime::query`]. A forbidden call never
//! reaches the dispatcher. Dispatcher errors come back unchanged.
//!
//! Transport encoding is left to whatever embeds the [`Server`]; request and
//! response types are plain serde structs.

pub mod auth;

use crate::catalog::MigrationReport;
use crate::domain::{CatalogEntry, ObjectType};
use crate::drivers::Row;
use crate::error::{Error, Result};
use crate::queries::{ProfileColumn, TableCardinality, TableColumns, TableHead};
use crate::runtime::{QueryContext, Runtime};
use auth::{Claims, Permission};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Rows returned by [`Server::table_rows`] when the request has no limit.
pub const TABLE_HEAD_DEFAULT_LIMIT: usize = 25;

/// Request for a table's row count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableCardinalityRequest {
    /// Instance owning the table
    pub instance_id: String,
    /// Table to count
    pub table_name: String,
    /// Scheduling priority; larger is more urgent
    #[serde(default)]
    pub priority: i32,
}

/// Row count of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCardinalityResponse {
    /// Number of rows
    pub cardinality: u64,
}

/// Request for a table's column profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableColumnsRequest {
    /// Instance owning the table
    pub instance_id: String,
    /// Table to profile
    pub table_name: String,
    /// Scheduling priority; larger is more urgent
    #[serde(default)]
    pub priority: i32,
}

/// Column profile of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumnsResponse {
    /// Columns in table order
    pub profile_columns: Vec<ProfileColumn>,
}

/// Request for a sample of a table's rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableRowsRequest {
    /// Instance owning the table
    pub instance_id: String,
    /// Table to read
    pub table_name: String,
    /// Maximum rows; 0 means [`TABLE_HEAD_DEFAULT_LIMIT`]
    #[serde(default)]
    pub limit: u32,
    /// Scheduling priority; larger is more urgent
    #[serde(default)]
    pub priority: i32,
}

/// Sampled rows of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRowsResponse {
    /// Rows keyed by column name
    pub data: Vec<Row>,
}

/// Handlers for profiling and catalog calls.
#[derive(Debug, Clone)]
pub struct Server {
    runtime: Arc<Runtime>,
}

impl Server {
    /// Serve requests against `runtime`.
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// The runtime requests are served from.
    #[must_use]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    fn authorize(claims: &dyn Claims, instance_id: &str, permission: Permission) -> Result<()> {
        if claims.can_instance(instance_id, permission) {
            Ok(())
        } else {
            warn!(
                subject = claims.subject(),
                instance_id,
                ?permission,
                "Permission denied"
            );
            Err(Error::Forbidden)
        }
    }

    /// Row count of a table.
    ///
    /// # Errors
    ///
    /// `Error::Forbidden` without [`Permission::ReadProfiling`], otherwise any
    /// error from [`Runtime::query`].
    pub async fn table_cardinality(
        &self,
        ctx: &QueryContext,
        claims: &dyn Claims,
        req: TableCardinalityRequest,
    ) -> Result<TableCardinalityResponse> {
        Self::authorize(claims, &req.instance_id, Permission::ReadProfiling)?;

        let mut q = TableCardinality::new(req.table_name);
        self.runtime
            .query(ctx, &req.instance_id, &mut q, i64::from(req.priority))
            .await?;
        let cardinality = q
            .result
            .ok_or_else(|| Error::Execution("query produced no result".to_string()))?;
        Ok(TableCardinalityResponse { cardinality })
    }

    /// Names, types and NULL counts of a table's columns.
    ///
    /// # Errors
    ///
    /// `Error::Forbidden` without [`Permission::ReadProfiling`], otherwise any
    /// error from [`Runtime::query`].
    pub async fn table_columns(
        &self,
        ctx: &QueryContext,
        claims: &dyn Claims,
        req: TableColumnsRequest,
    ) -> Result<TableColumnsResponse> {
        Self::authorize(claims, &req.instance_id, Permission::ReadProfiling)?;

        let mut q = TableColumns::new(req.table_name);
        self.runtime
            .query(ctx, &req.instance_id, &mut q, i64::from(req.priority))
            .await?;
        let profile_columns = q
            .result
            .ok_or_else(|| Error::Execution("query produced no result".to_string()))?;
        Ok(TableColumnsResponse { profile_columns })
    }

    /// The first rows of a table.
    ///
    /// # Errors
    ///
    /// `Error::Forbidden` without [`Permission::ReadProfiling`], otherwise any
    /// error from [`Runtime::query`].
    pub async fn table_rows(
        &self,
        ctx: &QueryContext,
        claims: &dyn Claims,
        req: TableRowsRequest,
    ) -> Result<TableRowsResponse> {
        Self::authorize(claims, &req.instance_id, Permission::ReadProfiling)?;

        let limit = match req.limit {
            0 => TABLE_HEAD_DEFAULT_LIMIT,
            n => usize::try_from(n).unwrap_or(usize::MAX),
        };
        let mut q = TableHead::new(req.table_name, limit);
        self.runtime
            .query(ctx, &req.instance_id, &mut q, i64::from(req.priority))
            .await?;
        let data = q
            .result
            .ok_or_else(|| Error::Execution("query produced no result".to_string()))?;
        Ok(TableRowsResponse { data })
    }

    /// Catalog entries of one type, with dependency edges.
    ///
    /// # Errors
    ///
    /// `Error::Forbidden` without [`Permission::ReadCatalog`], `Error::NotFound`
    /// for an unknown instance, or a catalog store failure.
    pub async fn list_catalog_entries(
        &self,
        claims: &dyn Claims,
        instance_id: &str,
        object_type: ObjectType,
    ) -> Result<Vec<CatalogEntry>> {
        Self::authorize(claims, instance_id, Permission::ReadCatalog)?;
        self.runtime
            .catalog(instance_id)
            .await?
            .find_entries(object_type)
            .await
    }

    /// One catalog entry, with dependency edges.
    ///
    /// # Errors
    ///
    /// `Error::Forbidden` without [`Permission::ReadCatalog`], `Error::NotFound`
    /// for an unknown instance or entry, or a catalog store failure.
    pub async fn get_catalog_entry(
        &self,
        claims: &dyn Claims,
        instance_id: &str,
        name: &str,
    ) -> Result<CatalogEntry> {
        Self::authorize(claims, instance_id, Permission::ReadCatalog)?;
        self.runtime
            .catalog(instance_id)
            .await?
            .find_entry(name)
            .await?
            .ok_or_else(|| Error::not_found("entry", name))
    }

    /// Reconcile the instance's catalog with its repository.
    ///
    /// # Errors
    ///
    /// `Error::Forbidden` without [`Permission::EditRepo`], `Error::NotFound`
    /// for an unknown instance, or any reconciliation error.
    pub async fn reconcile(
        &self,
        claims: &dyn Claims,
        instance_id: &str,
    ) -> Result<MigrationReport> {
        Self::authorize(claims, instance_id, Permission::EditRepo)?;
        debug!(subject = claims.subject(), instance_id, "Reconcile requested");
        self.runtime.catalog(instance_id).await?.reconcile().await
    }
}
