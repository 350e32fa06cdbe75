//! In-memory (single node) implementation of the resource API for local
//! development and testing.
//!
//! Objects are stored once per resource name and served under every
//! group-version that exposes that resource. Each object remembers the
//! group-version it was last persisted at; a successful update re-persists it
//! at the resource's current storage version.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use proven_resource_api::{
    ApiResource, ApiResourceList, GroupVersion, GroupVersionResource, Item, JsonMetadataAccessor,
    MetadataAccessor, NamespacedName, ResourceApi,
};
use serde_json::Value;
use tracing::debug;

/// An operation exposed by the resource API.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    /// `discover`
    Discover,

    /// `list`
    List,

    /// `get`
    Get,

    /// `update`
    Update,

    /// `list_custom_resource_groups`
    ListCustomGroups,

    /// `list_aggregated_api_groups`
    ListAggregatedGroups,
}

/// Per-object call counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ObjectCalls {
    /// Number of `get` calls addressed at the object.
    pub gets: usize,

    /// Number of `update` calls addressed at the object.
    pub updates: usize,
}

#[derive(Clone, Debug)]
struct StoredObject {
    body: Value,
    resource_version: u64,
    persisted_at: GroupVersion,
}

type CallKey = (Operation, String);

#[derive(Debug, Default)]
struct State {
    served: IndexMap<String, Vec<ApiResource>>,
    custom_groups: HashSet<String>,
    aggregated_groups: HashSet<String>,
    storage_versions: HashMap<String, GroupVersion>,
    objects: HashMap<String, BTreeMap<NamespacedName, StoredObject>>,
    failures: HashMap<CallKey, VecDeque<Error>>,
    calls: HashMap<CallKey, usize>,
    revision: u64,
}

impl State {
    fn record(&mut self, operation: Operation, target: String) -> Result<(), Error> {
        let key = (operation, target);
        *self.calls.entry(key.clone()).or_default() += 1;

        if let Some(error) = self.failures.get_mut(&key).and_then(VecDeque::pop_front) {
            debug!(?operation, target = %key.1, %error, "returning injected failure");
            return Err(error);
        }

        Ok(())
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn served_resource(&self, resource: &GroupVersionResource) -> Result<&ApiResource, Error> {
        self.served
            .get(&resource.group_version().to_string())
            .and_then(|resources| resources.iter().find(|r| r.name == resource.resource))
            .ok_or_else(|| Error::NotFound(format!("resource {resource} is not served")))
    }

    fn objects_mut(&mut self, resource: &str) -> &mut BTreeMap<NamespacedName, StoredObject> {
        self.objects.entry(resource.to_string()).or_default()
    }
}

fn object_key(resource: &str, namespace: &str, name: &str) -> String {
    format!("{resource}/{}", NamespacedName::new(namespace, name))
}

fn render(object: &StoredObject) -> Item {
    let mut body = object.body.clone();

    if let Some(map) = body.as_object_mut() {
        let metadata = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert(
                "resourceVersion".to_string(),
                Value::String(object.resource_version.to_string()),
            );
        }
    }

    Item::new(body)
}

fn strip_resource_version(item: &Item) -> Value {
    let mut body = item.as_value().clone();

    if let Some(metadata) = body.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("resourceVersion");
    }

    body
}

/// In-memory resource API.
#[derive(Clone, Debug, Default)]
pub struct MemoryResourceApi {
    state: Arc<Mutex<State>>,
}

impl MemoryResourceApi {
    /// Creates an empty `MemoryResourceApi`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `resource` under the (unparsed) `group_version`.
    pub fn serve(&self, group_version: impl Into<String>, resource: ApiResource) {
        self.state
            .lock()
            .served
            .entry(group_version.into())
            .or_default()
            .push(resource);
    }

    /// Serves a resource by name with the given verbs under every listed group-version.
    pub fn serve_versions<'a>(
        &self,
        resource: &str,
        group_versions: impl IntoIterator<Item = &'a str>,
        verbs: &[&str],
    ) {
        for group_version in group_versions {
            self.serve(group_version, ApiResource::new(resource, verbs.iter().copied()));
        }
    }

    /// Sets the group-version a resource is persisted at on write.
    pub fn set_storage_version(&self, resource: impl Into<String>, group_version: GroupVersion) {
        self.state
            .lock()
            .storage_versions
            .insert(resource.into(), group_version);
    }

    /// Marks a group as defined by custom resource definitions.
    pub fn add_custom_group(&self, group: impl Into<String>) {
        self.state.lock().custom_groups.insert(group.into());
    }

    /// Marks a group as served by a delegated API service.
    pub fn add_aggregated_group(&self, group: impl Into<String>) {
        self.state.lock().aggregated_groups.insert(group.into());
    }

    /// Stores an object as though it had been written at `persisted_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the object has no readable name.
    pub fn insert(
        &self,
        resource: &str,
        persisted_at: GroupVersion,
        item: &Item,
    ) -> Result<NamespacedName, Error> {
        let key = JsonMetadataAccessor.namespaced_name(item)?;
        let mut state = self.state.lock();
        let resource_version = state.next_revision();

        state.objects_mut(resource).insert(
            key.clone(),
            StoredObject {
                body: strip_resource_version(item),
                resource_version,
                persisted_at,
            },
        );

        Ok(key)
    }

    /// Deletes an object, as a concurrent client would.
    pub fn remove(&self, resource: &str, namespace: &str, name: &str) -> Option<Item> {
        self.state
            .lock()
            .objects_mut(resource)
            .remove(&NamespacedName::new(namespace, name))
            .map(|object| render(&object))
    }

    /// Bumps an object's resource version, as a concurrent writer would.
    ///
    /// Returns false if the object does not exist.
    pub fn touch(&self, resource: &str, namespace: &str, name: &str) -> bool {
        let mut state = self.state.lock();
        let revision = state.next_revision();

        match state
            .objects_mut(resource)
            .get_mut(&NamespacedName::new(namespace, name))
        {
            Some(object) => {
                object.resource_version = revision;
                true
            }
            None => false,
        }
    }

    /// The current representation of an object.
    #[must_use]
    pub fn object(&self, resource: &str, namespace: &str, name: &str) -> Option<Item> {
        self.state
            .lock()
            .objects
            .get(resource)
            .and_then(|objects| objects.get(&NamespacedName::new(namespace, name)))
            .map(render)
    }

    /// The group-version an object is currently persisted at.
    #[must_use]
    pub fn persisted_at(
        &self,
        resource: &str,
        namespace: &str,
        name: &str,
    ) -> Option<GroupVersion> {
        self.state
            .lock()
            .objects
            .get(resource)
            .and_then(|objects| objects.get(&NamespacedName::new(namespace, name)))
            .map(|object| object.persisted_at.clone())
    }

    /// Every stored object of a resource with the group-version it is persisted at.
    #[must_use]
    pub fn persisted_versions(&self, resource: &str) -> Vec<(NamespacedName, GroupVersion)> {
        self.state
            .lock()
            .objects
            .get(resource)
            .map(|objects| {
                objects
                    .iter()
                    .map(|(key, object)| (key.clone(), object.persisted_at.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Queues a failure for the next `discover` call.
    pub fn fail_discovery(&self, error: Error) {
        self.inject(Operation::Discover, String::new(), error);
    }

    /// Queues a failure for the next `list_custom_resource_groups` call.
    pub fn fail_custom_groups(&self, error: Error) {
        self.inject(Operation::ListCustomGroups, String::new(), error);
    }

    /// Queues a failure for the next `list_aggregated_api_groups` call.
    pub fn fail_aggregated_groups(&self, error: Error) {
        self.inject(Operation::ListAggregatedGroups, String::new(), error);
    }

    /// Queues a failure for the next `list` of a resource, at any version.
    pub fn fail_list(&self, resource: &str, error: Error) {
        self.inject(Operation::List, resource.to_string(), error);
    }

    /// Queues a failure for the next `get` of an object.
    pub fn fail_get(&self, resource: &str, namespace: &str, name: &str, error: Error) {
        self.inject(Operation::Get, object_key(resource, namespace, name), error);
    }

    /// Queues a failure for the next `update` of an object.
    pub fn fail_update(&self, resource: &str, namespace: &str, name: &str, error: Error) {
        self.inject(Operation::Update, object_key(resource, namespace, name), error);
    }

    fn inject(&self, operation: Operation, target: String, error: Error) {
        self.state
            .lock()
            .failures
            .entry((operation, target))
            .or_default()
            .push_back(error);
    }

    /// How often `get` and `update` were called for an object.
    #[must_use]
    pub fn calls(&self, resource: &str, namespace: &str, name: &str) -> ObjectCalls {
        let state = self.state.lock();
        let target = object_key(resource, namespace, name);
        let count = |operation: Operation| {
            state
                .calls
                .get(&(operation, target.clone()))
                .copied()
                .unwrap_or_default()
        };

        ObjectCalls {
            gets: count(Operation::Get),
            updates: count(Operation::Update),
        }
    }

    /// How often `list` was called for a resource.
    #[must_use]
    pub fn list_calls(&self, resource: &str) -> usize {
        self.state
            .lock()
            .calls
            .get(&(Operation::List, resource.to_string()))
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResourceApi for MemoryResourceApi {
    type Error = Error;

    async fn discover(&self) -> Result<Vec<ApiResourceList>, Self::Error> {
        let mut state = self.state.lock();
        state.record(Operation::Discover, String::new())?;

        Ok(state
            .served
            .iter()
            .map(|(group_version, resources)| {
                ApiResourceList::new(group_version.clone(), resources.clone())
            })
            .collect())
    }

    async fn list(
        &self,
        resource: &GroupVersionResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Item>, Self::Error> {
        let mut state = self.state.lock();
        state.record(Operation::List, resource.resource.clone())?;
        let namespaced = state.served_resource(resource)?.namespaced;
        let namespace = namespace.filter(|_| namespaced);

        Ok(state
            .objects
            .get(&resource.resource)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|(key, _)| namespace.is_none_or(|ns| key.namespace == ns))
                    .map(|(_, object)| render(object))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(
        &self,
        resource: &GroupVersionResource,
        namespace: &str,
        name: &str,
    ) -> Result<Item, Self::Error> {
        let mut state = self.state.lock();
        state.record(
            Operation::Get,
            object_key(&resource.resource, namespace, name),
        )?;
        state.served_resource(resource)?;

        state
            .objects
            .get(&resource.resource)
            .and_then(|objects| objects.get(&NamespacedName::new(namespace, name)))
            .map(render)
            .ok_or_else(|| {
                Error::NotFound(format!("{resource} {}", NamespacedName::new(namespace, name)))
            })
    }

    async fn update(
        &self,
        resource: &GroupVersionResource,
        namespace: &str,
        name: &str,
        item: &Item,
    ) -> Result<Item, Self::Error> {
        let mut state = self.state.lock();
        state.record(
            Operation::Update,
            object_key(&resource.resource, namespace, name),
        )?;
        state.served_resource(resource)?;

        let key = NamespacedName::new(namespace, name);
        if JsonMetadataAccessor.namespaced_name(item)? != key {
            return Err(Error::Rejected(format!(
                "object identity does not match request path {key}"
            )));
        }
        let expected = JsonMetadataAccessor.resource_version(item)?;

        let storage_version = state
            .storage_versions
            .get(&resource.resource)
            .cloned()
            .unwrap_or_else(|| resource.group_version());
        let revision = state.next_revision();

        let object = state
            .objects_mut(&resource.resource)
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("{resource} {key}")))?;

        if let Some(expected) = expected {
            if expected != object.resource_version.to_string() {
                let found = object.resource_version;
                return Err(Error::Conflict(format!(
                    "{resource} {key} has been modified; expected version {expected}, found {found}"
                )));
            }
        }

        object.body = strip_resource_version(item);
        object.resource_version = revision;
        object.persisted_at = storage_version;

        Ok(render(object))
    }

    async fn list_custom_resource_groups(&self) -> Result<HashSet<String>, Self::Error> {
        let mut state = self.state.lock();
        state.record(Operation::ListCustomGroups, String::new())?;

        Ok(state.custom_groups.clone())
    }

    async fn list_aggregated_api_groups(&self) -> Result<HashSet<String>, Self::Error> {
        let mut state = self.state.lock();
        state.record(Operation::ListAggregatedGroups, String::new())?;

        Ok(state.aggregated_groups.clone())
    }
}
