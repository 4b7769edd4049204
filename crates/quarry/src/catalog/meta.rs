//! Per-instance migration state.
//!
//! [`MigrationMeta`] publishes an immutable [`MigrationSnapshot`] (dependency
//! graph, the artifacts it was built from, last migration time) through an
//! [`ArcSwap`]. Readers load the current snapshot without locking and derive
//! from it; writers take the exclusive [`MigrationGuard`] for a whole
//! reconciliation pass and replace the snapshot in one store. A reader
//! therefore sees either the old graph or the new one in full, never a mix.
//!
//! The snapshot is also the authority on which entries exist. Catalog rows
//! are only served through [`MigrationSnapshot::project`], which hides rows
//! the snapshot does not cover and overlays the published definition, so a
//! row written by a pass that has not published (or never will) is never
//! paired with the wrong edges.

use super::artifact::Artifact;
use crate::dag::{DependencyGraph, normalize_name};
use crate::domain::{CatalogEntry, ObjectType};
use crate::error::{Error, Result};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// One published state of an instance's dependency information.
#[derive(Debug, Clone)]
pub struct MigrationSnapshot {
    graph: DependencyGraph,

    /// Normalized entry name -> the artifact published under it.
    artifacts: BTreeMap<String, Artifact>,

    last_migration: DateTime<Utc>,

    has_migrated: bool,
}

impl MigrationSnapshot {
    fn empty() -> Self {
        Self {
            graph: DependencyGraph::new(),
            artifacts: BTreeMap::new(),
            last_migration: DateTime::<Utc>::UNIX_EPOCH,
            has_migrated: false,
        }
    }

    /// The dependency graph.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Start time of the last successful reconciliation (Unix epoch if none).
    #[must_use]
    pub fn last_migration(&self) -> DateTime<Utc> {
        self.last_migration
    }

    /// Whether a reconciliation has ever completed.
    #[must_use]
    pub fn has_migrated(&self) -> bool {
        self.has_migrated
    }

    /// The artifact published under `name`.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(&normalize_name(name))
    }

    /// Every published artifact, keyed by normalized name.
    #[must_use]
    pub fn artifacts(&self) -> &BTreeMap<String, Artifact> {
        &self.artifacts
    }

    /// Number of published entries of `object_type`.
    #[must_use]
    pub fn count_of(&self, object_type: ObjectType) -> usize {
        self.artifacts
            .values()
            .filter(|a| a.definition.object_type() == object_type)
            .count()
    }

    /// Artifact path that defines `name`.
    #[must_use]
    pub fn resolve_path(&self, name: &str) -> Option<&Path> {
        self.artifact(name).map(|a| a.path.as_path())
    }

    /// Replace `entry.parents`/`entry.children` with the edges in this snapshot.
    pub fn fill_edges(&self, entry: &mut CatalogEntry) {
        entry.parents = self.graph.parents(&entry.name);
        entry.children = self.graph.children(&entry.name);
    }

    /// A persisted row as this snapshot describes it.
    ///
    /// `None` if the snapshot does not cover the entry. Otherwise the row
    /// keeps its timestamps and takes name, path and definition from the
    /// published artifact, with edges filled from the graph.
    #[must_use]
    pub fn project(&self, mut entry: CatalogEntry) -> Option<CatalogEntry> {
        let artifact = self.artifact(&entry.name)?;
        entry.name.clone_from(&artifact.name);
        entry.path.clone_from(&artifact.path);
        entry.definition = artifact.definition.clone();
        entry.object_type = artifact.definition.object_type();
        self.fill_edges(&mut entry);
        Some(entry)
    }
}

/// Mutable per-instance migration state.
#[derive(Debug)]
pub struct MigrationMeta {
    current: ArcSwap<MigrationSnapshot>,
    write_lock: Mutex<()>,
}

impl Default for MigrationMeta {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationMeta {
    /// State for an instance that has never migrated: empty graph, epoch
    /// timestamp.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(MigrationSnapshot::empty()),
            write_lock: Mutex::new(()),
        }
    }

    /// The currently published snapshot. Holding it keeps that state alive
    /// regardless of later reconciliations.
    #[must_use]
    pub fn snapshot(&self) -> Arc<MigrationSnapshot> {
        self.current.load_full()
    }

    /// Start time of the last successful reconciliation.
    #[must_use]
    pub fn last_migration(&self) -> DateTime<Utc> {
        self.current.load().last_migration
    }

    /// Whether a reconciliation has ever completed.
    #[must_use]
    pub fn has_migrated(&self) -> bool {
        self.current.load().has_migrated
    }

    /// Artifact path that defines `name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no artifact defines `name`.
    pub fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        self.current
            .load()
            .resolve_path(name)
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::not_found("path", name))
    }

    /// Fill one entry's edges from the current snapshot.
    pub fn fill_edges(&self, entry: &mut CatalogEntry) {
        self.current.load().fill_edges(entry);
    }

    /// Project one row through the current snapshot.
    /// See [`MigrationSnapshot::project`].
    #[must_use]
    pub fn project(&self, entry: CatalogEntry) -> Option<CatalogEntry> {
        self.current.load().project(entry)
    }

    /// Take exclusive write access. Held for a whole reconciliation pass;
    /// readers are never blocked by it.
    pub async fn lock(&self) -> MigrationGuard<'_> {
        MigrationGuard {
            meta: self,
            _guard: self.write_lock.lock().await,
        }
    }
}

/// Exclusive write access to a [`MigrationMeta`].
pub struct MigrationGuard<'a> {
    meta: &'a MigrationMeta,
    _guard: MutexGuard<'a, ()>,
}

impl MigrationGuard<'_> {
    /// The snapshot that was current when the guard was taken (no other
    /// writer can have replaced it since).
    #[must_use]
    pub fn current(&self) -> Arc<MigrationSnapshot> {
        self.meta.snapshot()
    }

    /// Publish a new graph and the artifacts it was built from (which also
    /// form the name -> path index), advance the migration time and mark the
    /// instance as migrated. The previous snapshot is replaced whole.
    pub fn reconcile(
        &mut self,
        graph: DependencyGraph,
        artifacts: impl IntoIterator<Item = Artifact>,
        migrated_at: DateTime<Utc>,
    ) {
        let artifacts = artifacts
            .into_iter()
            .map(|a| (normalize_name(&a.name), a))
            .collect();

        self.meta.current.store(Arc::new(MigrationSnapshot {
            graph,
            artifacts,
            last_migration: migrated_at,
            has_migrated: true,
        }));
    }
}
