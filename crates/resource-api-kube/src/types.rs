//! Wire types for the discovery and listing endpoints.

use serde::Deserialize;
use serde_json::Value;

/// `GET /api`
#[derive(Debug, Deserialize)]
pub struct ApiVersions {
    #[serde(default)]
    pub versions: Vec<String>,
}

/// `GET /apis`
#[derive(Debug, Deserialize)]
pub struct ApiGroupList {
    #[serde(default)]
    pub groups: Vec<ApiGroup>,
}

#[derive(Debug, Deserialize)]
pub struct ApiGroup {
    #[serde(default)]
    pub versions: Vec<GroupVersionForDiscovery>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionForDiscovery {
    pub group_version: String,
}

/// Any `*List` response.
#[derive(Debug, Deserialize)]
pub struct ObjectList<T> {
    pub kind: Option<String>,

    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct CustomResourceDefinition {
    pub spec: CustomResourceDefinitionSpec,
}

#[derive(Debug, Deserialize)]
pub struct CustomResourceDefinitionSpec {
    pub group: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiService {
    pub spec: ApiServiceSpec,
}

#[derive(Debug, Deserialize)]
pub struct ApiServiceSpec {
    #[serde(default)]
    pub group: String,

    /// Absent for locally served groups.
    pub service: Option<Value>,
}

/// The `Status` body returned with failed requests.
#[derive(Debug, Deserialize)]
pub struct Status {
    pub message: Option<String>,
}
