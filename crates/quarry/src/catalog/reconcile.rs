//! The reconciliation (migration) pass.
//!
//! Rebuilds an instance's dependency graph from its repository, diffs the
//! artifacts against the last published snapshot, decides which entries are
//! stale, brings the catalog store in line and finally publishes the new
//! graph together with the artifacts it was built from.
//!
//! The whole pass runs under the instance's [`MigrationGuard`]. If anything
//! fails before the publish step (unreadable file, invalid artifact,
//! duplicate name, cycle, a failed catalog write) the pass aborts and the
//! previously published snapshot stays authoritative. Rows already written
//! by the aborted pass stay hidden from readers (see
//! [`MigrationSnapshot::project`](super::meta::MigrationSnapshot::project))
//! and the next pass reports against the snapshot, not against those rows.
//!
//! Rows for dropped entries are deleted only after the publish. A failed
//! delete is logged and retried by the next pass.
//!
//! Files whose modification time is older than the previous pass are not
//! re-read; their definitions come from the published snapshot.

use super::artifact::{Artifact, parse_artifact};
use super::meta::{MigrationGuard, MigrationMeta};
use crate::dag::{DependencyGraph, normalize_name};
use crate::domain::CatalogEntry;
use crate::drivers::{CatalogStore, RepoStore};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of a successful reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Entries created by this pass
    pub added: Vec<String>,

    /// Entries whose definition or path changed
    pub updated: Vec<String>,

    /// Entries removed because their artifact is gone
    pub dropped: Vec<String>,

    /// Entries to rebuild, parents before children
    pub stale: Vec<String>,

    /// Artifact files reused from the catalog without re-reading
    pub reused_files: usize,

    /// Start time of the pass, published as the last migration time
    pub migrated_at: DateTime<Utc>,
}

/// Run one reconciliation pass for `instance_id`.
///
/// # Errors
///
/// - `Error::Cycle` naming the offending edge if the definitions are cyclic
/// - `Error::InvalidArtifact` if a file cannot be parsed
/// - `Error::Config` if two artifacts define the same name
/// - any error from the repository or catalog store
pub(crate) async fn run(
    catalog: &dyn CatalogStore,
    repo: &dyn RepoStore,
    meta: &MigrationMeta,
    instance_id: &str,
) -> Result<MigrationReport> {
    let mut guard = meta.lock().await;
    let started_at = Utc::now();
    info!(instance_id, "reconciliation started");

    let result = reconcile_locked(catalog, repo, &mut guard, instance_id, started_at).await;
    match &result {
        Ok(report) => info!(
            instance_id,
            added = report.added.len(),
            updated = report.updated.len(),
            dropped = report.dropped.len(),
            stale = report.stale.len(),
            "reconciliation finished"
        ),
        Err(e) => warn!(instance_id, error = %e, "reconciliation aborted, previous graph kept"),
    }
    result
}

async fn reconcile_locked(
    catalog: &dyn CatalogStore,
    repo: &dyn RepoStore,
    guard: &mut MigrationGuard<'_>,
    instance_id: &str,
    started_at: DateTime<Utc>,
) -> Result<MigrationReport> {
    let previous = guard.current();
    let published = previous.artifacts();

    let since = previous.has_migrated().then(|| previous.last_migration());
    let (artifacts, reused_files) = load_artifacts(repo, instance_id, published, since).await?;
    let by_name = index_by_name(artifacts)?;
    let graph = build_graph(&by_name)?;

    let mut added = Vec::new();
    let mut updated = Vec::new();
    for (key, artifact) in &by_name {
        match published.get(key) {
            None => added.push(artifact.name.clone()),
            Some(old) if old != artifact => updated.push(artifact.name.clone()),
            Some(_) => {}
        }
    }
    let dropped: Vec<String> = published
        .iter()
        .filter(|(key, _)| !by_name.contains_key(*key))
        .map(|(_, a)| a.name.clone())
        .collect();

    let stale = stale_entries(&graph, &by_name, added.iter().chain(&updated).chain(&dropped));

    let leftovers = write_entries(catalog, instance_id, &by_name).await?;
    guard.reconcile(graph, by_name.into_values(), started_at);

    for name in &leftovers {
        if let Err(e) = catalog.delete_entry(instance_id, name).await {
            warn!(instance_id, entry = %name, error = %e, "failed to delete dropped entry");
        }
    }

    Ok(MigrationReport {
        added,
        updated,
        dropped,
        stale,
        reused_files,
        migrated_at: started_at,
    })
}

/// Create or update a row for every artifact, keeping `created_on` of
/// existing rows. Returns the names of rows no artifact defines anymore.
async fn write_entries(
    catalog: &dyn CatalogStore,
    instance_id: &str,
    by_name: &BTreeMap<String, Artifact>,
) -> Result<Vec<String>> {
    let mut persisted: HashMap<String, CatalogEntry> = catalog
        .find_all_entries(instance_id)
        .await?
        .into_iter()
        .map(|e| (normalize_name(&e.name), e))
        .collect();

    for (key, artifact) in by_name {
        let entry = CatalogEntry::new(&artifact.name, &artifact.path, artifact.definition.clone());
        match persisted.remove(key) {
            None => catalog.create_entry(instance_id, entry).await?,
            Some(old) if is_modified(&old, artifact) => {
                catalog
                    .update_entry(
                        instance_id,
                        CatalogEntry {
                            created_on: old.created_on,
                            ..entry
                        },
                    )
                    .await?;
            }
            Some(_) => {}
        }
    }

    let mut leftovers: Vec<String> = persisted.into_values().map(|e| e.name).collect();
    leftovers.sort_by_key(|name| normalize_name(name));
    Ok(leftovers)
}

/// Read and parse every artifact, reusing published definitions for files
/// untouched since `since`.
async fn load_artifacts(
    repo: &dyn RepoStore,
    instance_id: &str,
    published: &BTreeMap<String, Artifact>,
    since: Option<DateTime<Utc>>,
) -> Result<(Vec<Artifact>, usize)> {
    let by_path: HashMap<&Path, &Artifact> = published
        .values()
        .map(|a| (a.path.as_path(), a))
        .collect();

    let paths = repo.list(instance_id).await?;
    let loaded = try_join_all(paths.iter().map(|path| {
        let cached = by_path.get(path.as_path()).copied();
        async move {
            if let (Some(artifact), Some(since)) = (cached, since) {
                if repo.stat(instance_id, path).await? < since {
                    debug!(path = %path.display(), "artifact unchanged, reusing definition");
                    return Ok::<_, Error>((artifact.clone(), true));
                }
            }
            let contents = repo.get(instance_id, path).await?;
            Ok((parse_artifact(path, &contents)?, false))
        }
    }))
    .await?;

    let reused = loaded.iter().filter(|(_, reused)| *reused).count();
    Ok((loaded.into_iter().map(|(a, _)| a).collect(), reused))
}

fn index_by_name(artifacts: Vec<Artifact>) -> Result<BTreeMap<String, Artifact>> {
    let mut by_name: BTreeMap<String, Artifact> = BTreeMap::new();
    for artifact in artifacts {
        let key = normalize_name(&artifact.name);
        if let Some(existing) = by_name.get(&key) {
            return Err(Error::Config(format!(
                "entry '{}' is defined by both {} and {}",
                artifact.name,
                existing.path.display(),
                artifact.path.display()
            )));
        }
        by_name.insert(key, artifact);
    }
    Ok(by_name)
}

fn build_graph(by_name: &BTreeMap<String, Artifact>) -> Result<DependencyGraph> {
    let mut graph = DependencyGraph::new();
    // Artifact spellings win over the spellings used in `depends_on`
    for artifact in by_name.values() {
        graph.add_node(&artifact.name);
    }
    for artifact in by_name.values() {
        for dep in artifact.definition.dependencies() {
            if let Err(e) = graph.add_edge(dep, &artifact.name) {
                warn!(
                    entry = %artifact.name,
                    dependency = dep,
                    path = %artifact.path.display(),
                    "dependency cycle"
                );
                return Err(e);
            }
        }
    }
    Ok(graph)
}

fn is_modified(entry: &CatalogEntry, artifact: &Artifact) -> bool {
    entry.definition != artifact.definition
        || entry.path != artifact.path
        || entry.name != artifact.name
}

/// Changed entries plus everything downstream of them (including downstream
/// of dropped entries), limited to entries that still exist, in topological
/// order.
fn stale_entries<'a>(
    graph: &DependencyGraph,
    by_name: &BTreeMap<String, Artifact>,
    changed: impl Iterator<Item = &'a String>,
) -> Vec<String> {
    let mut stale: HashSet<String> = HashSet::new();
    for name in changed {
        stale.insert(normalize_name(name));
        stale.extend(graph.descendants(name).iter().map(|d| normalize_name(d)));
    }

    graph
        .topological_order()
        .into_iter()
        .filter(|name| {
            let key = normalize_name(name);
            stale.contains(&key) && by_name.contains_key(&key)
        })
        .collect()
}
