//! `RepoStore` serving artifacts from a project directory.
//!
//! One directory backs one project, so every instance id resolves to the same
//! root. Artifact files are `*.yaml`/`*.yml` anywhere below the root; hidden
//! directories (e.g. `.git`) are skipped.

use crate::drivers::RepoStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Filesystem-backed artifact repository.
#[derive(Debug, Clone)]
pub struct FileRepo {
    root: PathBuf,
}

impl FileRepo {
    /// Serve artifacts below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a repository-relative path, refusing anything that escapes
    /// the root.
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::Storage(format!(
                "path '{}' is outside the repository",
                path.display()
            )));
        }
        Ok(self.root.join(path))
    }
}

fn is_artifact(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

#[async_trait]
impl RepoStore for FileRepo {
    async fn list(&self, _instance_id: &str) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if is_hidden(&entry.file_name()) {
                    continue;
                }
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && is_artifact(&path) {
                    if let Ok(relative) = path.strip_prefix(&self.root) {
                        found.push(relative.to_path_buf());
                    }
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn get(&self, _instance_id: &str, path: &Path) -> Result<String> {
        let full = self.resolve(path)?;
        match fs::read_to_string(&full).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found("file", path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stat(&self, _instance_id: &str, path: &Path) -> Result<DateTime<Utc>> {
        let full = self.resolve(path)?;
        let modified = fs::metadata(&full).await?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }
}
