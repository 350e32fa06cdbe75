use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error returned when a group-version string cannot be parsed.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("unexpected group-version string: {0:?}")]
pub struct ParseGroupVersionError(pub String);

/// An API group together with one of its served versions.
///
/// The core (legacy) group is represented by an empty `group`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersion {
    /// The API group, empty for the core group.
    pub group: String,

    /// The version within the group.
    pub version: String,
}

impl GroupVersion {
    /// Creates a new group-version.
    #[must_use]
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// Parses the discovery form of a group-version.
    ///
    /// `"v1"` is the core group at `v1`, `"apps/v1"` is group `apps` at `v1`
    /// and the empty string is the empty group-version. Anything with more
    /// than one separator is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the string contains more than one `/`.
    pub fn parse(s: &str) -> Result<Self, ParseGroupVersionError> {
        if s.is_empty() {
            return Ok(Self::default());
        }

        match s.split_once('/') {
            None => Ok(Self::new("", s)),
            Some((group, version)) if !version.contains('/') => Ok(Self::new(group, version)),
            Some(_) => Err(ParseGroupVersionError(s.to_string())),
        }
    }

    /// Attaches a resource name to this group-version.
    #[must_use]
    pub fn with_resource(&self, resource: impl Into<String>) -> GroupVersionResource {
        GroupVersionResource {
            group: self.group.clone(),
            version: self.version.clone(),
            resource: resource.into(),
        }
    }

}

impl Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

/// Identifies one kind of object as served at one schema version.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionResource {
    /// The API group, empty for the core group.
    pub group: String,

    /// The version the resource is addressed at.
    pub version: String,

    /// The plural resource name, e.g. `deployments`.
    pub resource: String,
}

impl GroupVersionResource {
    /// Creates a new group-version-resource.
    #[must_use]
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// The group-version part of this key.
    #[must_use]
    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::new(self.group.clone(), self.version.clone())
    }
}

impl Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_version(), self.resource)
    }
}

/// A resource exposed by a served group-version, as reported by discovery.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ApiResource {
    /// The plural resource name. Sub-resources contain a `/`.
    pub name: String,

    /// Whether instances live inside a namespace.
    #[serde(default)]
    pub namespaced: bool,

    /// The verbs the server supports for this resource.
    #[serde(default)]
    pub verbs: Vec<String>,
}

impl ApiResource {
    /// Creates a new resource description.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            namespaced: true,
            verbs: verbs.into_iter().map(Into::into).collect(),
        }
    }

    /// Marks the resource as cluster-scoped.
    #[must_use]
    pub fn cluster_scoped(mut self) -> Self {
        self.namespaced = false;
        self
    }

    /// Returns true if the resource name denotes a sub-resource.
    #[must_use]
    pub fn is_subresource(&self) -> bool {
        self.name.contains('/')
    }

    /// Returns true if every verb in `verbs` is supported.
    #[must_use]
    pub fn supports_all(&self, verbs: &[&str]) -> bool {
        verbs.iter().all(|verb| self.verbs.iter().any(|v| v == verb))
    }
}

/// The resources served under one group-version.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceList {
    /// The unparsed group-version string, e.g. `apps/v1`.
    pub group_version: String,

    /// The resources served under this group-version.
    #[serde(default)]
    pub resources: Vec<ApiResource>,
}

impl ApiResourceList {
    /// Creates a new resource list.
    #[must_use]
    pub fn new(group_version: impl Into<String>, resources: Vec<ApiResource>) -> Self {
        Self {
            group_version: group_version.into(),
            resources,
        }
    }
}

/// Identifies an object instance. Cluster-scoped objects have an empty namespace.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespacedName {
    /// The namespace, empty for cluster-scoped objects.
    pub namespace: String,

    /// The object name.
    pub name: String,
}

impl NamespacedName {
    /// Creates a new namespaced name.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// A single object instance in its opaque wire representation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(Value);

impl Item {
    /// Wraps a JSON representation.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Borrows the underlying representation.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consumes the item, returning its representation.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Item {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_parse_group_version() {
        assert_eq!(GroupVersion::parse("v1").unwrap(), GroupVersion::new("", "v1"));
        assert_eq!(
            GroupVersion::parse("apps/v1").unwrap(),
            GroupVersion::new("apps", "v1")
        );
        assert_eq!(GroupVersion::parse("").unwrap(), GroupVersion::default());
        assert_matches!(
            GroupVersion::parse("a/b/c"),
            Err(ParseGroupVersionError(s)) if s == "a/b/c"
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(GroupVersion::new("", "v1").to_string(), "v1");
        assert_eq!(
            GroupVersionResource::new("apps", "v1", "deployments").to_string(),
            "apps/v1/deployments"
        );
        assert_eq!(NamespacedName::new("", "node-1").to_string(), "node-1");
        assert_eq!(NamespacedName::new("kube-system", "dns").to_string(), "kube-system/dns");
    }

    #[test]
    fn test_api_resource_verbs() {
        let resource = ApiResource::new("deployments", ["get", "list", "update"]);
        assert!(resource.supports_all(&["list", "update"]));
        assert!(!resource.supports_all(&["list", "patch"]));
        assert!(!resource.is_subresource());
        assert!(ApiResource::new("deployments/status", ["get"]).is_subresource());
    }

    #[test]
    fn test_resource_list_wire_format() {
        let list: ApiResourceList = serde_json::from_value(serde_json::json!({
            "groupVersion": "v1",
            "resources": [
                {"name": "pods", "namespaced": true, "verbs": ["list", "update"]},
                {"name": "nodes", "namespaced": false, "verbs": ["list", "update"]}
            ]
        }))
        .unwrap();
        assert_eq!(list.group_version, "v1");
        assert_eq!(list.resources[0], ApiResource::new("pods", ["list", "update"]));
        assert_eq!(
            list.resources[1],
            ApiResource::new("nodes", ["list", "update"]).cluster_scoped()
        );
    }
}
