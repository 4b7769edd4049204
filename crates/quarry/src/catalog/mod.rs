//! Catalog service: persisted entries enriched with live dependency edges.
//!
//! [`CatalogService`] is a facade over an instance's stores and its
//! [`MigrationMeta`]. Read operations never mutate the graph; they load the
//! currently published snapshot and project the stored rows through it, so
//! any number of request handlers can call them concurrently. A row the
//! snapshot does not cover is not served, and a served row always carries
//! the definition its edges were derived from. The graph only changes
//! through [`CatalogService::reconcile`].
//!
//! # Reconciliation trigger
//!
//! Reconciliation runs when the caller asks for it, typically on a
//! repository-change notification. Concurrent calls serialize on the
//! instance's migration guard, and each runs a full pass against the
//! repository state it reads.

pub mod artifact;
pub mod meta;
pub mod reconcile;

use crate::domain::{CatalogEntry, ObjectType};
use crate::drivers::{CatalogStore, OlapStore, RegistryStore, RepoStore};
use crate::error::{Error, Result};
pub use meta::{MigrationGuard, MigrationMeta, MigrationSnapshot};
pub use reconcile::MigrationReport;
use std::path::PathBuf;
use std::sync::Arc;

/// Per-instance catalog facade.
#[derive(Clone)]
pub struct CatalogService {
    catalog: Arc<dyn CatalogStore>,
    repo: Arc<dyn RepoStore>,
    olap: Arc<dyn OlapStore>,
    registry: Arc<dyn RegistryStore>,
    instance_id: String,
    meta: Arc<MigrationMeta>,
}

impl std::fmt::Debug for CatalogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogService")
            .field("instance_id", &self.instance_id)
            .field("olap", &self.olap.dialect())
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl CatalogService {
    /// Create a service for one instance.
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        repo: Arc<dyn RepoStore>,
        olap: Arc<dyn OlapStore>,
        registry: Arc<dyn RegistryStore>,
        instance_id: impl Into<String>,
        meta: Arc<MigrationMeta>,
    ) -> Self {
        Self {
            catalog,
            repo,
            olap,
            registry,
            instance_id: instance_id.into(),
            meta,
        }
    }

    /// The instance this service serves.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The instance's migration state.
    #[must_use]
    pub fn meta(&self) -> &Arc<MigrationMeta> {
        &self.meta
    }

    /// The instance's OLAP handle.
    #[must_use]
    pub fn olap(&self) -> &Arc<dyn OlapStore> {
        &self.olap
    }

    /// All published entries of `object_type`, each projected through the
    /// same graph snapshot.
    ///
    /// # Errors
    ///
    /// Fails only if the catalog store lookup fails.
    pub async fn find_entries(&self, object_type: ObjectType) -> Result<Vec<CatalogEntry>> {
        let mut snapshot = self.meta.snapshot();
        loop {
            let expected = snapshot.count_of(object_type);
            let rows = self
                .catalog
                .find_entries(&self.instance_id, object_type)
                .await?;
            let mut entries = project_rows(&snapshot, rows, object_type);
            if entries.len() < expected {
                // A pass is rewriting rows of another kind that the snapshot
                // still publishes as `object_type`
                let rows = self.catalog.find_all_entries(&self.instance_id).await?;
                entries = project_rows(&snapshot, rows, object_type);
            }

            let current = self.meta.snapshot();
            if entries.len() == expected || Arc::ptr_eq(&current, &snapshot) {
                return Ok(entries);
            }
            // A newer pass deleted rows while they were being read
            snapshot = current;
        }
    }

    /// One published entry by name. `Ok(None)` means absent, not failure.
    ///
    /// # Errors
    ///
    /// Fails only if the catalog store lookup fails.
    pub async fn find_entry(&self, name: &str) -> Result<Option<CatalogEntry>> {
        let entry = self.catalog.find_entry(&self.instance_id, name).await?;
        Ok(entry.and_then(|entry| self.meta.project(entry)))
    }

    /// Artifact path that defines `name`, per the last reconciliation.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no artifact defines `name`.
    pub fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        self.meta.resolve_path(name)
    }

    /// Rebuild the dependency graph and catalog from the repository.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the instance has been removed from the
    /// registry. Otherwise see [`reconcile::run`]. On error the previous
    /// graph stays published.
    pub async fn reconcile(&self) -> Result<MigrationReport> {
        if self.registry.find_instance(&self.instance_id).await?.is_none() {
            return Err(Error::not_found("instance", &self.instance_id));
        }
        reconcile::run(
            self.catalog.as_ref(),
            self.repo.as_ref(),
            &self.meta,
            &self.instance_id,
        )
        .await
    }
}

fn project_rows(
    snapshot: &MigrationSnapshot,
    rows: Vec<CatalogEntry>,
    object_type: ObjectType,
) -> Vec<CatalogEntry> {
    rows.into_iter()
        .filter_map(|row| snapshot.project(row))
        .filter(|entry| entry.object_type == object_type)
        .collect()
}
