//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use quarry::catalog::CatalogService;
use quarry::config::RuntimeConfig;
use quarry::domain::{CatalogEntry, Instance, ObjectType};
use quarry::drivers::CatalogStore;
use quarry::drivers::in_memory::{InMemoryCatalog, InMemoryOlap, InMemoryRegistry, InMemoryRepo};
use quarry::error::{Error, Result};
use quarry::runtime::Runtime;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Instance id used by every fixture.
pub const INSTANCE: &str = "t1";

/// A runtime with one in-memory instance.
pub struct Fixture {
    pub runtime: Arc<Runtime>,
    pub repo: Arc<InMemoryRepo>,
    pub olap: Arc<InMemoryOlap>,
    pub catalog: CatalogService,
}

impl Fixture {
    /// Fixture with default configuration.
    pub async fn new() -> Self {
        Self::with(RuntimeConfig::default(), InMemoryOlap::new()).await
    }

    /// Fixture with the given configuration and OLAP engine.
    pub async fn with(config: RuntimeConfig, olap: InMemoryOlap) -> Self {
        Self::build(config, olap, Arc::new(InMemoryCatalog::new())).await
    }

    /// Fixture whose instance persists entries in `store`.
    pub async fn with_store(store: Arc<dyn CatalogStore>) -> Self {
        Self::build(RuntimeConfig::default(), InMemoryOlap::new(), store).await
    }

    async fn build(
        config: RuntimeConfig,
        olap: InMemoryOlap,
        store: Arc<dyn CatalogStore>,
    ) -> Self {
        let runtime = Arc::new(Runtime::new(config, Arc::new(InMemoryRegistry::new())).unwrap());
        let repo = Arc::new(InMemoryRepo::new());
        let olap = Arc::new(olap);
        let catalog = runtime
            .register_instance(
                Instance::new(INSTANCE, "memory", "memory"),
                store,
                repo.clone(),
                olap.clone(),
            )
            .await
            .unwrap();
        Self {
            runtime,
            repo,
            olap,
            catalog,
        }
    }

    /// Write an artifact file into the instance's repository.
    pub async fn put(&self, path: &str, contents: &str) {
        self.repo.put(INSTANCE, path, contents).await;
    }
}

pub fn source(connector: &str) -> String {
    format!("kind: source\nconnector: {connector}\n")
}

pub fn model(sql: &str, depends_on: &[&str]) -> String {
    format!("kind: model\nsql: {sql}\ndepends_on: [{}]\n", depends_on.join(", "))
}

// ========== Failure Injection ==========

/// Catalog store wrapper that fails chosen writes.
///
/// Each armed failure is consumed after one use, after which the wrapper
/// behaves like the in-memory store it wraps.
#[derive(Debug, Default)]
pub struct FailingCatalog {
    pub inner: InMemoryCatalog,
    fail_on_write: Mutex<HashSet<String>>,
}

impl FailingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next create, update or delete of `name`.
    pub fn fail_on_write(&self, name: &str) {
        self.fail_on_write
            .lock()
            .unwrap()
            .insert(name.to_lowercase());
    }

    fn check_write(&self, name: &str) -> Result<()> {
        if self.fail_on_write.lock().unwrap().remove(&name.to_lowercase()) {
            return Err(Error::Storage(format!("injected write failure: {name}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for FailingCatalog {
    async fn find_entries(
        &self,
        instance_id: &str,
        object_type: ObjectType,
    ) -> Result<Vec<CatalogEntry>> {
        self.inner.find_entries(instance_id, object_type).await
    }

    async fn find_all_entries(&self, instance_id: &str) -> Result<Vec<CatalogEntry>> {
        self.inner.find_all_entries(instance_id).await
    }

    async fn find_entry(&self, instance_id: &str, name: &str) -> Result<Option<CatalogEntry>> {
        self.inner.find_entry(instance_id, name).await
    }

    async fn create_entry(&self, instance_id: &str, entry: CatalogEntry) -> Result<()> {
        self.check_write(&entry.name)?;
        self.inner.create_entry(instance_id, entry).await
    }

    async fn update_entry(&self, instance_id: &str, entry: CatalogEntry) -> Result<()> {
        self.check_write(&entry.name)?;
        self.inner.update_entry(instance_id, entry).await
    }

    async fn delete_entry(&self, instance_id: &str, name: &str) -> Result<()> {
        self.check_write(name)?;
        self.inner.delete_entry(instance_id, name).await
    }
}
