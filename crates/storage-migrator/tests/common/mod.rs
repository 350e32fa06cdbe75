#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use proven_resource_api::{
    GroupVersion, Item, JsonMetadataAccessor, MetadataAccessor, MetadataError,
};
use proven_resource_api_memory::MemoryResourceApi;
use proven_storage_migrator::{CancellationToken, MigratorConfig, RetryPolicy};
use serde_json::json;

pub const VERBS: &[&str] = &["create", "delete", "get", "list", "patch", "update", "watch"];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn quick_retries(max_attempts: usize) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: 0.1,
        total_timeout: Some(Duration::from_secs(30)),
    }
}

pub fn config() -> MigratorConfig {
    MigratorConfig {
        list_retry: quick_retries(5),
        item_retry: quick_retries(5),
        ..MigratorConfig::default()
    }
}

pub fn object(namespace: &str, name: &str) -> Item {
    Item::new(json!({
        "metadata": {"namespace": namespace, "name": name, "labels": {"app": name}},
        "spec": {"replicas": 2, "template": {"image": format!("registry.local/{name}:1.0")}}
    }))
}

pub fn object_name(index: usize) -> String {
    format!("app-{index}")
}

/// A cluster where deployments and cronjobs are served at two versions and
/// persisted at the older one, alongside single-version and excluded resources.
pub fn cluster(objects_per_resource: usize) -> MemoryResourceApi {
    let api = MemoryResourceApi::new();

    api.serve_versions("configmaps", ["v1"], VERBS);
    api.serve_versions("events", ["v1", "events.k8s.io/v1"], VERBS);
    api.serve_versions("deployments", ["apps/v1", "apps/v1beta1"], VERBS);
    api.serve_versions("cronjobs", ["batch/v1", "batch/v1beta1"], VERBS);
    api.set_storage_version("deployments", GroupVersion::new("apps", "v1"));
    api.set_storage_version("cronjobs", GroupVersion::new("batch", "v1"));

    for index in 0..objects_per_resource {
        let name = object_name(index);
        let namespace = if index % 2 == 0 { "default" } else { "jobs" };

        for (resource, old_version) in [
            ("deployments", GroupVersion::new("apps", "v1beta1")),
            ("cronjobs", GroupVersion::new("batch", "v1beta1")),
            ("configmaps", GroupVersion::new("", "v1")),
            ("events", GroupVersion::new("", "v1")),
        ] {
            api.insert(resource, old_version, &object(namespace, &name))
                .unwrap();
        }
    }

    api
}

/// Reads metadata normally but cancels the run once it has seen `after` objects.
#[derive(Debug)]
pub struct CancellingAccessor {
    pub cancel: CancellationToken,
    pub after: usize,
    pub seen: AtomicUsize,
}

impl CancellingAccessor {
    pub fn new(cancel: CancellationToken, after: usize) -> Arc<Self> {
        Arc::new(Self {
            cancel,
            after,
            seen: AtomicUsize::new(0),
        })
    }
}

impl MetadataAccessor for CancellingAccessor {
    fn namespace(&self, item: &Item) -> Result<String, MetadataError> {
        JsonMetadataAccessor.namespace(item)
    }

    fn name(&self, item: &Item) -> Result<String, MetadataError> {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.cancel.cancel();
        }
        JsonMetadataAccessor.name(item)
    }

    fn resource_version(&self, item: &Item) -> Result<Option<String>, MetadataError> {
        JsonMetadataAccessor.resource_version(item)
    }
}

/// Panics when asked for the name of one particular object.
#[derive(Debug)]
pub struct PoisonedAccessor(pub &'static str);

impl MetadataAccessor for PoisonedAccessor {
    fn namespace(&self, item: &Item) -> Result<String, MetadataError> {
        JsonMetadataAccessor.namespace(item)
    }

    fn name(&self, item: &Item) -> Result<String, MetadataError> {
        let name = JsonMetadataAccessor.name(item)?;
        assert_ne!(name, self.0, "poisoned object");
        Ok(name)
    }

    fn resource_version(&self, item: &Item) -> Result<Option<String>, MetadataError> {
        JsonMetadataAccessor.resource_version(item)
    }
}
