//! Abstract interface for discovering, listing and rewriting objects served by a
//! clustered, versioned resource API.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod metadata;
mod types;

pub use metadata::{JsonMetadataAccessor, MetadataAccessor, MetadataError};
pub use types::{
    ApiResource, ApiResourceList, GroupVersion, GroupVersionResource, Item, NamespacedName,
    ParseGroupVersionError,
};

use std::collections::HashSet;
use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::time::Duration;

use async_trait::async_trait;

/// The classification of a resource API error.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ResourceApiErrorKind {
    /// The addressed object or resource does not exist.
    NotFound,

    /// The write carried a stale resource version.
    Conflict,

    /// The server asked the client to slow down.
    Throttled,

    /// A transient server or transport failure.
    Transient,

    /// Anything else. Not worth retrying.
    Other,
}

impl ResourceApiErrorKind {
    /// Returns true if an operation failing with this kind may succeed when retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Conflict | Self::Throttled | Self::Transient)
    }
}

impl Display for ResourceApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for `ResourceApi` errors
pub trait ResourceApiError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> ResourceApiErrorKind;

    /// How long the server asked the client to wait before retrying, if it said.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Abstract interface to a clustered resource API server.
#[async_trait]
pub trait ResourceApi
where
    Self: Send + Sync + Clone + 'static,
{
    /// The error type for this client.
    type Error: ResourceApiError;

    /// Enumerates every served group-version and the resources it exposes.
    async fn discover(&self) -> Result<Vec<ApiResourceList>, Self::Error>;

    /// Lists every instance of a resource, in one namespace or (with `None`) all of them.
    ///
    /// Cluster-scoped resources are listed regardless of `namespace`.
    async fn list(
        &self,
        resource: &GroupVersionResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Item>, Self::Error>;

    /// Fetches the current representation of a single object.
    async fn get(
        &self,
        resource: &GroupVersionResource,
        namespace: &str,
        name: &str,
    ) -> Result<Item, Self::Error>;

    /// Replaces a single object, guarded by the resource version it carries.
    async fn update(
        &self,
        resource: &GroupVersionResource,
        namespace: &str,
        name: &str,
        item: &Item,
    ) -> Result<Item, Self::Error>;

    /// Groups whose resources are defined by custom resource definitions.
    async fn list_custom_resource_groups(&self) -> Result<HashSet<String>, Self::Error>;

    /// Groups served by an external, delegated API service.
    async fn list_aggregated_api_groups(&self) -> Result<HashSet<String>, Self::Error>;
}
