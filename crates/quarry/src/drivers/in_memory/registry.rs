//! `RegistryStore` backed by a sorted map.

use crate::domain::Instance;
use crate::drivers::RegistryStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Thread-safe in-memory instance registry.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    instances: RwLock<BTreeMap<String, Instance>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistry {
    async fn find_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.instances.read().await.values().cloned().collect())
    }

    async fn find_instance(&self, instance_id: &str) -> Result<Option<Instance>> {
        Ok(self.instances.read().await.get(instance_id).cloned())
    }

    async fn create_instance(&self, instance: Instance) -> Result<()> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(Error::Storage(format!(
                "instance '{}' already exists",
                instance.id
            )));
        }
        instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        self.instances.write().await.remove(instance_id);
        Ok(())
    }
}
