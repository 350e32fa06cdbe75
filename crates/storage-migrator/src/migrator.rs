//! Coordinates a migration run across every discovered resource type.

use std::collections::HashMap;
use std::sync::Arc;

use proven_resource_api::{
    GroupVersionResource, JsonMetadataAccessor, MetadataAccessor, ResourceApi,
};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::{MigratorConfig, RetryPolicy};
use crate::discovery::ResourceDiscoverer;
use crate::error::Result;
use crate::item::ItemMigrator;
use crate::results::{MigrationErrorKind, MigrationOutcome, ResultAggregator, RunResult};
use crate::retry::{RetryError, retry_on_error};

/// Rewrites every object of every multi-version resource so the server
/// persists it at the current storage version.
#[derive(Clone, Debug)]
pub struct StorageMigrator<A: ResourceApi> {
    api: A,
    config: MigratorConfig,
    accessor: Arc<dyn MetadataAccessor>,
}

impl<A: ResourceApi> StorageMigrator<A> {
    /// Creates a migrator reading object metadata from the standard JSON fields.
    pub fn new(api: A, config: MigratorConfig) -> Self {
        Self {
            api,
            config,
            accessor: Arc::new(JsonMetadataAccessor),
        }
    }

    /// Replaces the metadata accessor.
    #[must_use]
    pub fn with_metadata_accessor(mut self, accessor: Arc<dyn MetadataAccessor>) -> Self {
        self.accessor = accessor;
        self
    }

    /// Runs one migration pass.
    ///
    /// Each resource type is migrated by its own task; objects within a type
    /// are migrated one at a time. Per-type and per-object failures are
    /// recorded in the returned `RunResult`, as is cancellation once
    /// discovery has finished.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or is cancelled.
    pub async fn start(&self, cancel: CancellationToken) -> Result<RunResult> {
        let resources = ResourceDiscoverer::new(
            self.api.clone(),
            self.config.excluded_resources.clone(),
        )
        .discover(&cancel)
        .await?;

        info!(resources = resources.len(), "schema migration started");
        let started = Instant::now();

        let aggregator = Arc::new(ResultAggregator::new());
        let items = ItemMigrator::new(
            self.api.clone(),
            self.accessor.clone(),
            self.config.item_retry.clone(),
        );

        let mut tasks = JoinSet::new();
        let mut task_resources = HashMap::new();

        for resource in resources {
            let task = ResourceTask {
                api: self.api.clone(),
                items: items.clone(),
                list_retry: self.config.list_retry.clone(),
                resource: resource.clone(),
                cancel: cancel.clone(),
                aggregator: aggregator.clone(),
            };
            let handle = tasks.spawn(task.run());
            task_resources.insert(handle.id(), resource);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, ())) => {
                    task_resources.remove(&id);
                }
                Err(e) => {
                    let Some(resource) = task_resources.remove(&e.id()) else {
                        error!(error = %e, "Migration task for unknown resource failed");
                        continue;
                    };
                    error!(%resource, error = %e, "Migration task failed");
                    aggregator.append(vec![MigrationOutcome::error(
                        resource,
                        None,
                        MigrationErrorKind::TaskFailed,
                        format!("migration task failed: {e}"),
                    )]);
                }
            }
        }

        let result = aggregator.finish();
        info!(
            duration = ?started.elapsed(),
            status = ?result.status,
            outcomes = result.items.len(),
            "schema migration finished"
        );

        Ok(result)
    }
}

struct ResourceTask<A: ResourceApi> {
    api: A,
    items: ItemMigrator<A>,
    list_retry: RetryPolicy,
    resource: GroupVersionResource,
    cancel: CancellationToken,
    aggregator: Arc<ResultAggregator>,
}

impl<A: ResourceApi> ResourceTask<A> {
    #[instrument(name = "migrate_resource", skip(self), fields(resource = %self.resource))]
    async fn run(self) {
        let outcomes = self.migrate().await;
        self.aggregator.append(outcomes);
    }

    async fn migrate(&self) -> Vec<MigrationOutcome> {
        let listed = retry_on_error(&self.list_retry, &self.cancel, "list", || {
            self.api.list(&self.resource, None)
        })
        .await;

        let listed = match listed {
            Ok(listed) => listed,
            Err(RetryError::Cancelled) => {
                return vec![MigrationOutcome::error(
                    self.resource.clone(),
                    None,
                    MigrationErrorKind::Cancelled,
                    "migration cancelled while listing resources",
                )];
            }
            Err(RetryError::Failed { attempts, source }) => {
                error!(attempts, error = %source, "Failed to list resources");
                return vec![MigrationOutcome::error(
                    self.resource.clone(),
                    None,
                    MigrationErrorKind::ListFailed,
                    format!("could not list resources: {source}"),
                )];
            }
        };

        info!(objects = listed.len(), "Migrating resource");

        let mut outcomes = Vec::with_capacity(listed.len());
        for item in listed {
            let outcome = self.items.migrate(&self.resource, item, &self.cancel).await;
            let cancelled = outcome.is_cancelled();
            outcomes.push(outcome);

            if cancelled {
                info!("Migration cancelled, remaining objects left untouched");
                break;
            }
        }

        outcomes
    }
}
