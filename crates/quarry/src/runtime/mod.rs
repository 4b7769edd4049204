//! Per-instance runtime state and the query dispatcher.
//!
//! A [`Runtime`] owns one [`InstanceHandle`] per registered instance: the
//! instance's [`CatalogService`] and the [`PriorityGate`] that admits queries
//! to its OLAP engine. Instances share nothing, so work on one never waits
//! on another.
//!
//! # Dispatch
//!
//! [`Runtime::query`] runs a [`Query`] in four steps:
//! 1. Validate the priority and fail fast on an already-done context.
//! 2. Resolve the instance.
//! 3. Wait for an admission permit, bounded by the caller's context and the
//!    configured admission timeout.
//! 4. Execute against the OLAP store and, on success only, write the result
//!    into the query.
//!
//! Cancellation during step 3 or 4 drops the in-flight future, which
//! releases the permit and discards any OLAP-side result.

mod context;
mod scheduler;

pub use context::{CancelHandle, Priority, QueryContext};
pub use scheduler::{Permit, PriorityGate};

use crate::catalog::{CatalogService, MigrationMeta};
use crate::config::RuntimeConfig;
use crate::domain::Instance;
use crate::drivers::{CatalogStore, OlapStore, RegistryStore, RepoStore};
use crate::error::{Error, Result};
use crate::queries::Query;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything the runtime holds for one instance.
#[derive(Debug)]
pub struct InstanceHandle {
    catalog: CatalogService,
    gate: PriorityGate,
}

impl InstanceHandle {
    /// The instance's catalog service.
    #[must_use]
    pub fn catalog(&self) -> &CatalogService {
        &self.catalog
    }

    /// The instance's admission gate.
    #[must_use]
    pub fn gate(&self) -> &PriorityGate {
        &self.gate
    }
}

/// Runtime over all registered instances.
pub struct Runtime {
    config: RuntimeConfig,
    registry: Arc<dyn RegistryStore>,
    instances: RwLock<HashMap<String, Arc<InstanceHandle>>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Create a runtime with no instances loaded.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `config` fails validation.
    pub fn new(config: RuntimeConfig, registry: Arc<dyn RegistryStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            instances: RwLock::new(HashMap::new()),
        })
    }

    /// The configuration the runtime was built with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Record `instance` in the registry and bring up its catalog service and
    /// admission gate. The instance starts unmigrated.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the registry already has the id.
    pub async fn register_instance(
        &self,
        instance: Instance,
        catalog: Arc<dyn CatalogStore>,
        repo: Arc<dyn RepoStore>,
        olap: Arc<dyn OlapStore>,
    ) -> Result<CatalogService> {
        let instance_id = instance.id.clone();
        self.registry.create_instance(instance).await?;

        let service = CatalogService::new(
            catalog,
            repo,
            olap,
            Arc::clone(&self.registry),
            instance_id.clone(),
            Arc::new(MigrationMeta::new()),
        );
        let scheduler = &self.config.scheduler;
        let handle = Arc::new(InstanceHandle {
            catalog: service.clone(),
            gate: PriorityGate::new(scheduler.max_concurrent_queries, scheduler.aging_interval()),
        });

        self.instances
            .write()
            .await
            .insert(instance_id.clone(), handle);
        info!(instance_id = %instance_id, "Registered instance");
        Ok(service)
    }

    /// Unload an instance and remove it from the registry. Queries already
    /// admitted keep their handle and finish normally.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the instance is not loaded.
    pub async fn remove_instance(&self, instance_id: &str) -> Result<()> {
        self.instances
            .write()
            .await
            .remove(instance_id)
            .ok_or_else(|| Error::not_found("instance", instance_id))?;
        self.registry.delete_instance(instance_id).await?;
        info!(instance_id, "Removed instance");
        Ok(())
    }

    /// Instances recorded in the registry, sorted by id.
    ///
    /// # Errors
    ///
    /// Fails only if the registry lookup fails.
    pub async fn instances(&self) -> Result<Vec<Instance>> {
        let mut instances = self.registry.find_instances().await?;
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    /// The handle for a loaded instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the instance is not loaded.
    pub async fn instance(&self, instance_id: &str) -> Result<Arc<InstanceHandle>> {
        self.instances
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or_else(|| Error::not_found("instance", instance_id))
    }

    /// The catalog service of a loaded instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the instance is not loaded.
    pub async fn catalog(&self, instance_id: &str) -> Result<CatalogService> {
        Ok(self.instance(instance_id).await?.catalog.clone())
    }

    /// Run `query` against the instance's OLAP engine.
    ///
    /// `priority` orders admission when the engine's slots are taken; larger
    /// is more urgent. It never changes the result. Waiting queries age, so a
    /// low-priority query is eventually admitted ahead of newer urgent ones.
    ///
    /// On success the result is written into `query`. On any error the
    /// query's result slot is left as it was.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidPriority` if `priority` is negative or above the
    ///   configured maximum
    /// - `Error::Cancelled` if `ctx` is cancelled or its deadline passes
    ///   before the query completes
    /// - `Error::NotFound` if the instance is not loaded
    /// - `Error::AdmissionTimeout` if no slot frees up in time
    /// - `Error::Execution` (or any other error) from the query itself
    pub async fn query<Q: Query>(
        &self,
        ctx: &QueryContext,
        instance_id: &str,
        query: &mut Q,
        priority: i64,
    ) -> Result<()> {
        let priority = Priority::new(priority, self.config.scheduler.max_priority)?;
        ctx.check()?;
        let handle = self.instance(instance_id).await?;
        let key = query.key();

        let queued_at = Instant::now();
        let admission_timeout = self.config.scheduler.admission_timeout();
        let _permit = tokio::select! {
            biased;
            cause = ctx.done() => {
                debug!(instance_id, query = %key, %cause, "Query abandoned while queued");
                return Err(Error::Cancelled(cause));
            }
            admitted = tokio::time::timeout(admission_timeout, handle.gate.acquire(priority)) => {
                match admitted {
                    Ok(permit) => permit?,
                    Err(_) => {
                        warn!(
                            instance_id,
                            query = %key,
                            priority = priority.get(),
                            "Query admission timed out"
                        );
                        return Err(Error::AdmissionTimeout {
                            instance_id: instance_id.to_string(),
                            waited: queued_at.elapsed(),
                        });
                    }
                }
            }
        };
        debug!(
            instance_id,
            query = %key,
            priority = priority.get(),
            waited_ms = queued_at.elapsed().as_millis(),
            "Query admitted"
        );

        let olap = handle.catalog.olap().as_ref();
        let output = tokio::select! {
            biased;
            cause = ctx.done() => {
                debug!(instance_id, query = %key, %cause, "Query cancelled during execution");
                return Err(Error::Cancelled(cause));
            }
            output = query.execute(olap) => output.inspect_err(|e| {
                debug!(instance_id, query = %key, error = %e, "Query failed");
            })?,
        };

        query.set_result(output);
        debug!(instance_id, query = %key, "Query completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::in_memory::{
        InMemoryCatalog, InMemoryOlap, InMemoryRegistry, InMemoryRepo, Table,
    };
    use crate::error::CancelCause;
    use crate::queries::TableCardinality;
    use serde_json::json;
    use std::time::Duration;

    async fn runtime_with(olap: InMemoryOlap, slots: usize) -> (Runtime, Arc<InMemoryOlap>) {
        let mut config = RuntimeConfig::default();
        config.scheduler.max_concurrent_queries = slots;
        let runtime = Runtime::new(config, Arc::new(InMemoryRegistry::new())).unwrap();

        olap.create_table(
            "orders",
            Table::new(&[("id", "BIGINT")])
                .with_row(vec![json!(1)])
                .with_row(vec![json!(2)]),
        )
        .await;
        let olap = Arc::new(olap);
        runtime
            .register_instance(
                Instance::new("t1", "memory", "memory"),
                Arc::new(InMemoryCatalog::new()),
                Arc::new(InMemoryRepo::new()),
                olap.clone(),
            )
            .await
            .unwrap();
        (runtime, olap)
    }

    #[tokio::test]
    async fn test_query_sets_result() {
        let (runtime, _) = runtime_with(InMemoryOlap::new(), 1).await;
        let mut q = TableCardinality::new("orders");
        runtime
            .query(&QueryContext::background(), "t1", &mut q, 0)
            .await
            .unwrap();
        assert_eq!(q.result, Some(2));
    }

    #[tokio::test]
    async fn test_register_duplicate_instance_fails() {
        let (runtime, _) = runtime_with(InMemoryOlap::new(), 1).await;
        let err = runtime
            .register_instance(
                Instance::new("t1", "memory", "memory"),
                Arc::new(InMemoryCatalog::new()),
                Arc::new(InMemoryRepo::new()),
                Arc::new(InMemoryOlap::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_remove_instance() {
        let (runtime, _) = runtime_with(InMemoryOlap::new(), 1).await;
        runtime
            .register_instance(
                Instance::new("t0", "duckdb", "file"),
                Arc::new(InMemoryCatalog::new()),
                Arc::new(InMemoryRepo::new()),
                Arc::new(InMemoryOlap::new()),
            )
            .await
            .unwrap();
        let ids: Vec<_> = runtime.instances().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["t0", "t1"]);

        runtime.remove_instance("t1").await.unwrap();
        let remaining = runtime.instances().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].olap_driver, "duckdb");
        assert!(matches!(
            runtime.catalog("t1").await,
            Err(Error::NotFound { kind: "instance", .. })
        ));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = RuntimeConfig::default();
        config.scheduler.max_concurrent_queries = 0;
        assert!(Runtime::new(config, Arc::new(InMemoryRegistry::new())).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_timeout() {
        let (runtime, _) = runtime_with(InMemoryOlap::new(), 1).await;
        let handle = runtime.instance("t1").await.unwrap();
        let _held = handle.gate().acquire(Priority::LOWEST).await.unwrap();

        let mut q = TableCardinality::new("orders");
        let err = runtime
            .query(&QueryContext::background(), "t1", &mut q, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AdmissionTimeout { .. }));
        assert!(q.result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_queued_frees_queue_place() {
        let (runtime, olap) = runtime_with(InMemoryOlap::new(), 1).await;
        let handle = runtime.instance("t1").await.unwrap();
        let held = handle.gate().acquire(Priority::LOWEST).await.unwrap();

        let ctx = QueryContext::background().with_timeout(Duration::from_millis(50));
        let mut q = TableCardinality::new("orders");
        let err = runtime.query(&ctx, "t1", &mut q, 5).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(CancelCause::DeadlineExceeded)));
        assert_eq!(olap.execution_count(), 0);

        drop(held);
        assert_eq!(handle.gate().available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_execution_releases_permit() {
        let (runtime, _) =
            runtime_with(InMemoryOlap::new().with_latency(Duration::from_secs(10)), 1).await;
        let handle = runtime.instance("t1").await.unwrap();

        let ctx = QueryContext::background().with_timeout(Duration::from_secs(1));
        let mut q = TableCardinality::new("orders");
        let err = runtime.query(&ctx, "t1", &mut q, 0).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(q.result.is_none());
        assert_eq!(handle.gate().available(), 1);
    }
}
