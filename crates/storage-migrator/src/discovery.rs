//! Finds the resource types served at more than one version.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;

use indexmap::IndexMap;
use proven_resource_api::{
    ApiResourceList, GroupVersion, GroupVersionResource, ResourceApi, ResourceApiError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

const REQUIRED_VERBS: &[&str] = &["list", "update"];

/// Selects the resources worth migrating from a discovery catalog.
///
/// A resource is kept when it is served under at least two distinct
/// group-versions, outside custom and aggregated groups, is not a
/// sub-resource, is not excluded, and supports both `list` and `update`.
/// Each kept resource is addressed at the first group-version it was seen
/// under, and results follow first-seen order.
#[must_use]
pub fn migratable_resources(
    lists: &[ApiResourceList],
    custom_groups: &HashSet<String>,
    aggregated_groups: &HashSet<String>,
    excluded_resources: &BTreeSet<String>,
) -> Vec<GroupVersionResource> {
    let mut versions_by_resource: IndexMap<&str, Vec<GroupVersion>> = IndexMap::new();

    for list in lists {
        let group_version = match GroupVersion::parse(&list.group_version) {
            Ok(group_version) => group_version,
            Err(e) => {
                error!(error = %e, "Skipping unparseable group-version");
                continue;
            }
        };

        if custom_groups.contains(&group_version.group) {
            info!(group = %group_version.group, "Skipping custom resource group");
            continue;
        }
        if aggregated_groups.contains(&group_version.group) {
            info!(group = %group_version.group, "Skipping aggregated API group");
            continue;
        }

        for resource in &list.resources {
            if resource.is_subresource()
                || excluded_resources.contains(&resource.name)
                || !resource.supports_all(REQUIRED_VERBS)
            {
                continue;
            }

            let versions = versions_by_resource
                .entry(resource.name.as_str())
                .or_default();
            if !versions.contains(&group_version) {
                versions.push(group_version.clone());
            }
        }
    }

    versions_by_resource
        .into_iter()
        .filter(|(_, versions)| versions.len() > 1)
        .map(|(name, versions)| versions[0].with_resource(name))
        .collect()
}

/// Queries the API for everything `migratable_resources` needs.
#[derive(Clone, Debug)]
pub struct ResourceDiscoverer<A: ResourceApi> {
    api: A,
    excluded_resources: BTreeSet<String>,
}

impl<A: ResourceApi> ResourceDiscoverer<A> {
    /// Creates a new discoverer.
    pub const fn new(api: A, excluded_resources: BTreeSet<String>) -> Self {
        Self {
            api,
            excluded_resources,
        }
    }

    /// Returns the resources to migrate, each at its representative version.
    ///
    /// # Errors
    ///
    /// Fails if any discovery call fails, or if `cancel` fires first.
    pub async fn discover(&self, cancel: &CancellationToken) -> Result<Vec<GroupVersionResource>> {
        let custom_groups = call(
            cancel,
            "list custom resource groups",
            self.api.list_custom_resource_groups(),
        )
        .await?;
        let aggregated_groups = call(
            cancel,
            "list aggregated API groups",
            self.api.list_aggregated_api_groups(),
        )
        .await?;
        let lists = call(cancel, "discover served resources", self.api.discover()).await?;

        let resources = migratable_resources(
            &lists,
            &custom_groups,
            &aggregated_groups,
            &self.excluded_resources,
        );
        debug!(
            group_versions = lists.len(),
            resources = resources.len(),
            "Discovery complete"
        );

        Ok(resources)
    }
}

async fn call<T, E, F>(cancel: &CancellationToken, operation: &'static str, future: F) -> Result<T>
where
    E: ResourceApiError,
    F: Future<Output = std::result::Result<T, E>>,
{
    match cancel.run_until_cancelled(future).await {
        None => Err(Error::Cancelled),
        Some(result) => result.map_err(|e| Error::Discovery {
            operation,
            source: Box::new(e),
        }),
    }
}
