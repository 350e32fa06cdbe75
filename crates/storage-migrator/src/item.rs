//! Rewrites a single object at the current storage version.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use proven_resource_api::{
    GroupVersionResource, Item, MetadataAccessor, NamespacedName, ResourceApi, ResourceApiError,
    ResourceApiErrorKind,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::results::{MigrationErrorKind, MigrationOutcome, OutcomeStatus};
use crate::retry::{Backoff, sleep_or_cancel};

/// Writes objects back unchanged so the server re-encodes them at its
/// current storage version.
#[derive(Clone, Debug)]
pub struct ItemMigrator<A: ResourceApi> {
    api: A,
    accessor: Arc<dyn MetadataAccessor>,
    policy: RetryPolicy,
}

impl<A: ResourceApi> ItemMigrator<A> {
    /// Creates a new item migrator.
    pub fn new(api: A, accessor: Arc<dyn MetadataAccessor>, policy: RetryPolicy) -> Self {
        Self {
            api,
            accessor,
            policy,
        }
    }

    /// Migrates one listed object.
    ///
    /// Conflicts refetch the object and retry; throttling and transient
    /// failures back off and retry. Every other failure is terminal. The
    /// object's content is never modified.
    pub async fn migrate(
        &self,
        resource: &GroupVersionResource,
        item: Item,
        cancel: &CancellationToken,
    ) -> MigrationOutcome {
        let key = match self.accessor.namespaced_name(&item) {
            Ok(key) => key,
            Err(e) => {
                return MigrationOutcome::error(
                    resource.clone(),
                    None,
                    MigrationErrorKind::Metadata,
                    format!("cannot read object metadata: {e}"),
                );
            }
        };

        let status = self.migrate_object(resource, &key, item, cancel).await;
        match &status {
            OutcomeStatus::Success => debug!(%resource, object = %key, "Migrated object"),
            OutcomeStatus::NotFoundSkipped => {
                debug!(%resource, object = %key, "Object deleted before migration, skipped");
            }
            OutcomeStatus::Error { kind, message } => {
                warn!(%resource, object = %key, %kind, %message, "Failed to migrate object");
            }
        }

        MigrationOutcome::new(resource.clone(), Some(key), status)
    }

    async fn migrate_object(
        &self,
        resource: &GroupVersionResource,
        key: &NamespacedName,
        mut held: Item,
        cancel: &CancellationToken,
    ) -> OutcomeStatus {
        let started = Instant::now();
        let deadline = self.policy.total_timeout.map(|total| started + total);
        let mut backoff = Backoff::new(&self.policy);
        let mut needs_refresh = false;
        let mut failures = 0;

        loop {
            let (error, delay) = if needs_refresh {
                let fetched = bounded(
                    cancel,
                    deadline,
                    failures,
                    self.api.get(resource, &key.namespace, &key.name),
                )
                .await;

                match fetched {
                    Err(status) => return status,
                    Ok(Ok(fresh)) => {
                        held = fresh;
                        needs_refresh = false;
                        continue;
                    }
                    Ok(Err(e)) if e.kind() == ResourceApiErrorKind::NotFound => {
                        return OutcomeStatus::NotFoundSkipped;
                    }
                    Ok(Err(e)) => {
                        let delay = e.retry_after().unwrap_or_else(|| backoff.next_delay());
                        (e, delay)
                    }
                }
            } else {
                let written = bounded(
                    cancel,
                    deadline,
                    failures,
                    self.api.update(resource, &key.namespace, &key.name, &held),
                )
                .await;

                match written {
                    Err(status) => return status,
                    Ok(Ok(_)) => return OutcomeStatus::Success,
                    Ok(Err(e)) => match e.kind() {
                        ResourceApiErrorKind::NotFound => return OutcomeStatus::NotFoundSkipped,
                        ResourceApiErrorKind::Conflict => {
                            needs_refresh = true;
                            (e, Duration::ZERO)
                        }
                        ResourceApiErrorKind::Throttled => {
                            let delay = e.retry_after().unwrap_or_default();
                            (e, delay)
                        }
                        ResourceApiErrorKind::Transient => {
                            let delay = e.retry_after().unwrap_or_else(|| backoff.next_delay());
                            (e, delay)
                        }
                        ResourceApiErrorKind::Other => {
                            return OutcomeStatus::Error {
                                kind: MigrationErrorKind::NonRetryable,
                                message: format!("can not retry: {e}"),
                            };
                        }
                    },
                }
            };

            failures += 1;
            let out_of_time = self
                .policy
                .total_timeout
                .is_some_and(|total| started.elapsed() + delay >= total);
            if failures >= self.policy.max_attempts || out_of_time {
                return OutcomeStatus::Error {
                    kind: MigrationErrorKind::RetriesExhausted,
                    message: format!("gave up after {failures} attempts: {error}"),
                };
            }

            debug!(
                %resource,
                object = %key,
                attempt = failures,
                delay = ?delay,
                error = %error,
                "Object migration will be retried"
            );

            if !sleep_or_cancel(cancel, delay).await {
                return cancelled();
            }
        }
    }
}

/// Runs one API call until it completes, the token is cancelled or the
/// object's time budget runs out.
async fn bounded<F: Future>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    failures: usize,
    call: F,
) -> Result<F::Output, OutcomeStatus> {
    let call = async {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call).await.ok(),
            None => Some(call.await),
        }
    };

    match cancel.run_until_cancelled(call).await {
        None => Err(cancelled()),
        Some(None) => Err(OutcomeStatus::Error {
            kind: MigrationErrorKind::RetriesExhausted,
            message: format!("time budget exhausted after {failures} failed attempts"),
        }),
        Some(Some(output)) => Ok(output),
    }
}

fn cancelled() -> OutcomeStatus {
    OutcomeStatus::Error {
        kind: MigrationErrorKind::Cancelled,
        message: "migration cancelled".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::future::pending;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use proven_resource_api::{ApiResourceList, GroupVersion, JsonMetadataAccessor};
    use proven_resource_api_memory::{Error as MemoryError, MemoryResourceApi, ObjectCalls};
    use serde_json::json;

    use super::*;

    const VERBS: &[&str] = &["get", "list", "update"];

    fn secrets() -> GroupVersionResource {
        GroupVersionResource::new("", "v1", "secrets")
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: 0.0,
            total_timeout: Some(Duration::from_secs(60)),
        }
    }

    /// A server that accepts requests for objects and never answers them.
    #[derive(Clone, Debug)]
    struct UnresponsiveApi;

    #[async_trait]
    impl ResourceApi for UnresponsiveApi {
        type Error = MemoryError;

        async fn discover(&self) -> Result<Vec<ApiResourceList>, MemoryError> {
            Ok(Vec::new())
        }

        async fn list(
            &self,
            _resource: &GroupVersionResource,
            _namespace: Option<&str>,
        ) -> Result<Vec<Item>, MemoryError> {
            Ok(Vec::new())
        }

        async fn get(
            &self,
            _resource: &GroupVersionResource,
            _namespace: &str,
            _name: &str,
        ) -> Result<Item, MemoryError> {
            pending().await
        }

        async fn update(
            &self,
            _resource: &GroupVersionResource,
            _namespace: &str,
            _name: &str,
            _item: &Item,
        ) -> Result<Item, MemoryError> {
            pending().await
        }

        async fn list_custom_resource_groups(&self) -> Result<HashSet<String>, MemoryError> {
            Ok(HashSet::new())
        }

        async fn list_aggregated_api_groups(&self) -> Result<HashSet<String>, MemoryError> {
            Ok(HashSet::new())
        }
    }

    fn setup() -> (MemoryResourceApi, ItemMigrator<MemoryResourceApi>, Item) {
        let api = MemoryResourceApi::new();
        api.serve_versions("secrets", ["v1"], VERBS);

        let item = Item::new(json!({
            "metadata": {"namespace": "default", "name": "token"},
            "data": {"password": "aHVudGVyMg=="}
        }));
        api.insert("secrets", GroupVersion::new("", "v1beta1"), &item)
            .unwrap();

        let listed = api.object("secrets", "default", "token").unwrap();
        let migrator = ItemMigrator::new(api.clone(), Arc::new(JsonMetadataAccessor), policy());

        (api, migrator, listed)
    }

    #[tokio::test]
    async fn test_rewrites_object() {
        let (api, migrator, item) = setup();

        let outcome = migrator
            .migrate(&secrets(), item, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(
            outcome.namespaced_name,
            Some(NamespacedName::new("default", "token"))
        );
        assert_eq!(
            api.persisted_at("secrets", "default", "token"),
            Some(GroupVersion::new("", "v1"))
        );
        assert_eq!(
            api.calls("secrets", "default", "token"),
            ObjectCalls {
                gets: 0,
                updates: 1
            }
        );
    }

    #[tokio::test]
    async fn test_conflict_refreshes_once() {
        let (api, migrator, item) = setup();
        api.fail_update(
            "secrets",
            "default",
            "token",
            MemoryError::Conflict("object has been modified".into()),
        );

        let outcome = migrator
            .migrate(&secrets(), item, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(
            api.calls("secrets", "default", "token"),
            ObjectCalls {
                gets: 1,
                updates: 2
            }
        );
    }

    #[tokio::test]
    async fn test_stale_listing_is_refreshed() {
        let (api, migrator, item) = setup();
        assert!(api.touch("secrets", "default", "token"));

        let outcome = migrator
            .migrate(&secrets(), item, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(api.calls("secrets", "default", "token").gets, 1);
    }

    #[tokio::test]
    async fn test_deleted_before_write_is_skipped() {
        let (api, migrator, item) = setup();
        api.remove("secrets", "default", "token");

        let outcome = migrator
            .migrate(&secrets(), item, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, OutcomeStatus::NotFoundSkipped);
    }

    #[tokio::test]
    async fn test_deleted_before_refresh_is_skipped() {
        let (api, migrator, item) = setup();
        api.fail_update(
            "secrets",
            "default",
            "token",
            MemoryError::Conflict("stale".into()),
        );
        api.fail_get(
            "secrets",
            "default",
            "token",
            MemoryError::NotFound("secrets \"token\" not found".into()),
        );

        let outcome = migrator
            .migrate(&secrets(), item, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, OutcomeStatus::NotFoundSkipped);
        assert_eq!(api.calls("secrets", "default", "token").updates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_waits_without_refresh() {
        let (api, migrator, item) = setup();
        api.fail_update(
            "secrets",
            "default",
            "token",
            MemoryError::Throttled {
                message: "too many requests".into(),
                retry_after: Some(Duration::from_secs(2)),
            },
        );

        let started = Instant::now();
        let outcome = migrator
            .migrate(&secrets(), item, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(
            api.calls("secrets", "default", "token"),
            ObjectCalls {
                gets: 0,
                updates: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_back_off() {
        let (api, migrator, item) = setup();
        for _ in 0..2 {
            api.fail_update(
                "secrets",
                "default",
                "token",
                MemoryError::Unavailable("etcd timeout".into()),
            );
        }

        let outcome = migrator
            .migrate(&secrets(), item, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(api.calls("secrets", "default", "token").updates, 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_terminal() {
        let (api, migrator, item) = setup();
        api.fail_update(
            "secrets",
            "default",
            "token",
            MemoryError::Rejected("admission webhook denied the request".into()),
        );

        let outcome = migrator
            .migrate(&secrets(), item, &CancellationToken::new())
            .await;

        assert_matches!(
            outcome.status,
            OutcomeStatus::Error { kind: MigrationErrorKind::NonRetryable, message }
                if message.contains("admission webhook")
        );
    }

    #[tokio::test]
    async fn test_sustained_conflicts_exhaust_retries() {
        let (api, migrator, item) = setup();
        for _ in 0..10 {
            api.fail_update(
                "secrets",
                "default",
                "token",
                MemoryError::Conflict("stale".into()),
            );
        }

        let outcome = migrator
            .migrate(&secrets(), item, &CancellationToken::new())
            .await;

        assert_eq!(
            outcome.status.error_kind(),
            Some(MigrationErrorKind::RetriesExhausted)
        );
        assert_eq!(api.calls("secrets", "default", "token").updates, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_budget_exhausts_retries() {
        let (api, mut migrator, item) = setup();
        migrator.policy.max_attempts = 100;
        migrator.policy.total_timeout = Some(Duration::from_secs(5));
        for _ in 0..10 {
            api.fail_update(
                "secrets",
                "default",
                "token",
                MemoryError::Throttled {
                    message: "slow down".into(),
                    retry_after: Some(Duration::from_secs(2)),
                },
            );
        }

        let outcome = migrator
            .migrate(&secrets(), item, &CancellationToken::new())
            .await;

        assert_eq!(
            outcome.status.error_kind(),
            Some(MigrationErrorKind::RetriesExhausted)
        );
        assert_eq!(api.calls("secrets", "default", "token").updates, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_write_is_bounded_by_time_budget() {
        let mut policy = policy();
        policy.total_timeout = Some(Duration::from_secs(5));
        let migrator = ItemMigrator::new(UnresponsiveApi, Arc::new(JsonMetadataAccessor), policy);
        let item = Item::new(json!({"metadata": {"namespace": "default", "name": "token"}}));

        let started = Instant::now();
        let outcome = migrator
            .migrate(&secrets(), item, &CancellationToken::new())
            .await;

        assert_matches!(
            outcome.status,
            OutcomeStatus::Error { kind: MigrationErrorKind::RetriesExhausted, message }
                if message.contains("time budget")
        );
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_missing_name_is_a_metadata_error() {
        let (api, migrator, _) = setup();

        let outcome = migrator
            .migrate(
                &secrets(),
                Item::new(json!({"metadata": {"namespace": "default"}})),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            outcome.status.error_kind(),
            Some(MigrationErrorKind::Metadata)
        );
        assert_eq!(outcome.namespaced_name, None);
        assert_eq!(api.calls("secrets", "default", "").updates, 0);
    }

    #[tokio::test]
    async fn test_cancelled_item_is_not_written() {
        let (api, migrator, item) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = migrator.migrate(&secrets(), item, &cancel).await;

        assert!(outcome.is_cancelled());
        assert_eq!(
            api.persisted_at("secrets", "default", "token"),
            Some(GroupVersion::new("", "v1beta1"))
        );
    }
}
