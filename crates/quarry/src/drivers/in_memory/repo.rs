//! `RepoStore` holding artifact files in memory.

use crate::drivers::RepoStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct RepoFile {
    contents: String,
    modified: DateTime<Utc>,
}

/// Thread-safe in-memory artifact repository.
#[derive(Debug, Default)]
pub struct InMemoryRepo {
    files: RwLock<HashMap<String, BTreeMap<PathBuf, RepoFile>>>,
}

impl InMemoryRepo {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a file.
    pub async fn put(
        &self,
        instance_id: &str,
        path: impl Into<PathBuf>,
        contents: impl Into<String>,
    ) {
        let mut files = self.files.write().await;
        files.entry(instance_id.to_string()).or_default().insert(
            path.into(),
            RepoFile {
                contents: contents.into(),
                modified: Utc::now(),
            },
        );
    }

    /// Delete a file. Missing files are ignored.
    pub async fn delete(&self, instance_id: &str, path: &Path) {
        let mut files = self.files.write().await;
        if let Some(by_path) = files.get_mut(instance_id) {
            by_path.remove(path);
        }
    }
}

#[async_trait]
impl RepoStore for InMemoryRepo {
    async fn list(&self, instance_id: &str) -> Result<Vec<PathBuf>> {
        let files = self.files.read().await;
        Ok(files
            .get(instance_id)
            .map(|by_path| by_path.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, instance_id: &str, path: &Path) -> Result<String> {
        let files = self.files.read().await;
        files
            .get(instance_id)
            .and_then(|by_path| by_path.get(path))
            .map(|f| f.contents.clone())
            .ok_or_else(|| Error::not_found("file", path.display().to_string()))
    }

    async fn stat(&self, instance_id: &str, path: &Path) -> Result<DateTime<Utc>> {
        let files = self.files.read().await;
        files
            .get(instance_id)
            .and_then(|by_path| by_path.get(path))
            .map(|f| f.modified)
            .ok_or_else(|| Error::not_found("file", path.display().to_string()))
    }
}
