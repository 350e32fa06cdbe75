//! Implementation of the resource API against a Kubernetes-style REST API server.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod types;

pub use config::KubeResourceApiConfig;
pub use error::Error;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use proven_resource_api::{ApiResourceList, GroupVersion, GroupVersionResource, Item, ResourceApi};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};
use types::{ApiGroupList, ApiService, ApiVersions, CustomResourceDefinition, ObjectList, Status};
use url::Url;

const CUSTOM_RESOURCE_DEFINITIONS_PATH: &str =
    "apis/apiextensions.k8s.io/v1/customresourcedefinitions";
const API_SERVICES_PATH: &str = "apis/apiregistration.k8s.io/v1/apiservices";

/// Resource API client speaking the Kubernetes REST conventions.
#[derive(Clone, Debug)]
pub struct KubeResourceApi {
    base_url: Url,
    client: Client,
}

impl KubeResourceApi {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the bearer token is not a valid header value or the
    /// HTTP client cannot be built.
    pub fn new(
        KubeResourceApiConfig {
            mut base_url,
            bearer_token,
            timeout,
            accept_invalid_certs,
        }: KubeResourceApiConfig,
    ) -> Result<Self, Error> {
        // Url::join drops the last path segment unless the base ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self { base_url, client })
    }

    fn group_version_path(group_version: &GroupVersion) -> String {
        if group_version.group.is_empty() {
            format!("api/{}", group_version.version)
        } else {
            format!("apis/{}/{}", group_version.group, group_version.version)
        }
    }

    fn resource_path(
        resource: &GroupVersionResource,
        namespace: &str,
        name: Option<&str>,
    ) -> String {
        let mut path = Self::group_version_path(&resource.group_version());

        if !namespace.is_empty() {
            path.push_str("/namespaces/");
            path.push_str(namespace);
        }
        path.push('/');
        path.push_str(&resource.resource);

        if let Some(name) = name {
            path.push('/');
            path.push_str(name);
        }

        path
    }

    async fn check(response: Response) -> Result<Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Status>(&body)
            .ok()
            .and_then(|status| status.message)
            .unwrap_or(body);

        Err(Error::Status {
            status,
            message,
            retry_after,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.base_url.join(path)?;
        trace!(%url, "GET");

        let response = Self::check(self.client.get(url).send().await?).await?;
        let bytes = response.bytes().await?;

        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn discover_group_version(&self, path: String) -> Result<ApiResourceList, Error> {
        debug!(%path, "discovering resources");
        self.get_json(&path).await
    }

    async fn is_namespaced(&self, resource: &GroupVersionResource) -> Result<bool, Error> {
        let path = Self::group_version_path(&resource.group_version());
        let list = self.discover_group_version(path).await?;

        Ok(list
            .resources
            .iter()
            .find(|served| served.name == resource.resource)
            .is_none_or(|served| served.namespaced))
    }
}

#[async_trait]
impl ResourceApi for KubeResourceApi {
    type Error = Error;

    async fn discover(&self) -> Result<Vec<ApiResourceList>, Self::Error> {
        let mut paths = Vec::new();

        let core: ApiVersions = self.get_json("api").await?;
        for version in core.versions {
            paths.push(format!("api/{version}"));
        }

        let groups: ApiGroupList = self.get_json("apis").await?;
        for group in groups.groups {
            for version in group.versions {
                paths.push(format!("apis/{}", version.group_version));
            }
        }

        let mut lists = Vec::with_capacity(paths.len());
        for path in paths {
            lists.push(self.discover_group_version(path).await?);
        }

        Ok(lists)
    }

    async fn list(
        &self,
        resource: &GroupVersionResource,
        namespace: Option<&str>,
    ) -> Result<Vec<Item>, Self::Error> {
        // Cluster-scoped resources have no namespaced list endpoint.
        let namespace = match namespace {
            Some(namespace) if self.is_namespaced(resource).await? => namespace,
            _ => "",
        };

        let path = Self::resource_path(resource, namespace, None);
        let list: ObjectList<Value> = self.get_json(&path).await?;

        // List items omit apiVersion/kind; restore them so they can be written back as-is.
        let api_version = resource.group_version().to_string();
        let kind = list
            .kind
            .as_deref()
            .and_then(|kind| kind.strip_suffix("List"))
            .map(ToString::to_string);

        Ok(list
            .items
            .into_iter()
            .map(|mut value| {
                if let Some(object) = value.as_object_mut() {
                    object
                        .entry("apiVersion")
                        .or_insert_with(|| Value::String(api_version.clone()));
                    if let Some(kind) = &kind {
                        object
                            .entry("kind")
                            .or_insert_with(|| Value::String(kind.clone()));
                    }
                }
                Item::new(value)
            })
            .collect())
    }

    async fn get(
        &self,
        resource: &GroupVersionResource,
        namespace: &str,
        name: &str,
    ) -> Result<Item, Self::Error> {
        self.get_json(&Self::resource_path(resource, namespace, Some(name)))
            .await
    }

    async fn update(
        &self,
        resource: &GroupVersionResource,
        namespace: &str,
        name: &str,
        item: &Item,
    ) -> Result<Item, Self::Error> {
        let url = self
            .base_url
            .join(&Self::resource_path(resource, namespace, Some(name)))?;
        trace!(%url, "PUT");

        let response = Self::check(self.client.put(url).json(item).send().await?).await?;
        let bytes = response.bytes().await?;

        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list_custom_resource_groups(&self) -> Result<HashSet<String>, Self::Error> {
        let list: ObjectList<CustomResourceDefinition> =
            self.get_json(CUSTOM_RESOURCE_DEFINITIONS_PATH).await?;

        Ok(list.items.into_iter().map(|crd| crd.spec.group).collect())
    }

    async fn list_aggregated_api_groups(&self) -> Result<HashSet<String>, Self::Error> {
        let list: ObjectList<ApiService> = self.get_json(API_SERVICES_PATH).await?;

        Ok(list
            .items
            .into_iter()
            .filter(|service| service.spec.service.is_some())
            .map(|service| service.spec.group)
            .collect())
    }
}
