//! `CatalogStore` backed by per-instance maps.

use crate::dag::normalize_name;
use crate::domain::{CatalogEntry, ObjectType};
use crate::drivers::CatalogStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Entries keyed by instance id, then by normalized name.
type Entries = HashMap<String, BTreeMap<String, CatalogEntry>>;

/// Thread-safe in-memory catalog.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    entries: RwLock<Entries>,
}

impl InMemoryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Strip derived edges so they can never be persisted.
fn persisted(mut entry: CatalogEntry) -> CatalogEntry {
    entry.parents.clear();
    entry.children.clear();
    entry
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn find_entries(
        &self,
        instance_id: &str,
        object_type: ObjectType,
    ) -> Result<Vec<CatalogEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(instance_id)
            .map(|by_name| {
                by_name
                    .values()
                    .filter(|e| e.object_type == object_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_all_entries(&self, instance_id: &str) -> Result<Vec<CatalogEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(instance_id)
            .map(|by_name| by_name.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_entry(&self, instance_id: &str, name: &str) -> Result<Option<CatalogEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(instance_id)
            .and_then(|by_name| by_name.get(&normalize_name(name)))
            .cloned())
    }

    async fn create_entry(&self, instance_id: &str, entry: CatalogEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        let by_name = entries.entry(instance_id.to_string()).or_default();

        let key = normalize_name(&entry.name);
        if by_name.contains_key(&key) {
            return Err(Error::Storage(format!(
                "entry '{}' already exists in instance '{instance_id}'",
                entry.name
            )));
        }
        by_name.insert(key, persisted(entry));
        Ok(())
    }

    async fn update_entry(&self, instance_id: &str, entry: CatalogEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        let slot = entries
            .get_mut(instance_id)
            .and_then(|by_name| by_name.get_mut(&normalize_name(&entry.name)))
            .ok_or_else(|| Error::not_found("entry", entry.name.clone()))?;
        *slot = persisted(entry);
        Ok(())
    }

    async fn delete_entry(&self, instance_id: &str, name: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(by_name) = entries.get_mut(instance_id) {
            by_name.remove(&normalize_name(name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntryDefinition, SourceDefinition};

    fn source(name: &str) -> CatalogEntry {
        CatalogEntry::new(
            name,
            format!("sources/{name}.yaml"),
            EntryDefinition::Source(SourceDefinition {
                connector: "local_file".to_string(),
                uri: None,
                depends_on: vec![],
            }),
        )
    }

    #[tokio::test]
    async fn test_find_entry_is_case_insensitive() {
        let catalog = InMemoryCatalog::new();
        catalog.create_entry("t1", source("Orders")).await.unwrap();

        let found = catalog.find_entry("t1", "ORDERS").await.unwrap().unwrap();
        assert_eq!(found.name, "Orders");
        assert!(catalog.find_entry("t2", "orders").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let catalog = InMemoryCatalog::new();
        catalog.create_entry("t1", source("a")).await.unwrap();
        let err = catalog.create_entry("t1", source("A")).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let catalog = InMemoryCatalog::new();
        let err = catalog.update_entry("t1", source("a")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "entry", .. }));
    }

    #[tokio::test]
    async fn test_edges_are_never_persisted() {
        let catalog = InMemoryCatalog::new();
        let mut entry = source("a");
        entry.children = vec!["b".to_string()];
        catalog.create_entry("t1", entry).await.unwrap();

        let found = catalog.find_entry("t1", "a").await.unwrap().unwrap();
        assert!(found.children.is_empty());
    }

    #[tokio::test]
    async fn test_delete_then_find() {
        let catalog = InMemoryCatalog::new();
        catalog.create_entry("t1", source("a")).await.unwrap();
        catalog.delete_entry("t1", "A").await.unwrap();
        catalog.delete_entry("t1", "a").await.unwrap();
        assert!(catalog.find_all_entries("t1").await.unwrap().is_empty());
    }
}
