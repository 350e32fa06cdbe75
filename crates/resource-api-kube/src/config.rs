use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration for the `KubeResourceApi`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KubeResourceApiConfig {
    /// Base URL of the API server, e.g. `https://127.0.0.1:6443`.
    pub base_url: Url,

    /// Bearer token sent with every request.
    pub bearer_token: Option<String>,

    /// Timeout applied to every individual request.
    pub timeout: Duration,

    /// Skip TLS certificate verification. Only for local clusters with self-signed certificates.
    pub accept_invalid_certs: bool,
}

impl KubeResourceApiConfig {
    /// Creates a configuration for `base_url` with default settings.
    #[must_use]
    pub const fn new(base_url: Url) -> Self {
        Self {
            base_url,
            bearer_token: None,
            timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
        }
    }
}
