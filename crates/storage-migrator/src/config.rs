//! Configuration for a migration run.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resources never migrated unless the caller overrides the exclusion set.
///
/// Events are high volume and short lived, so rewriting them is wasted work.
pub const DEFAULT_EXCLUDED_RESOURCES: &[&str] = &["events"];

/// Exponential backoff with jitter, bounded by attempts and optionally by elapsed time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of failed attempts before giving up
    pub max_attempts: usize,
    /// Initial backoff delay
    pub initial_delay: Duration,
    /// Maximum backoff delay
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
    /// Fraction of each delay added as random jitter (0.1 = up to 10%)
    pub jitter: f64,
    /// Total time allowed across all attempts
    pub total_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Policy for listing a resource type: a handful of quick attempts.
    #[must_use]
    pub const fn listing() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 5.0,
            jitter: 0.1,
            total_timeout: None,
        }
    }

    /// Policy for rewriting a single object under contention.
    #[must_use]
    pub const fn item_writes() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.1,
            total_timeout: Some(Duration::from_secs(300)), // 5 minutes
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::listing()
    }
}

/// Configuration for a `StorageMigrator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Resource names that are never migrated, whatever versions they are served at
    pub excluded_resources: BTreeSet<String>,
    /// Retry policy for listing each resource type
    pub list_retry: RetryPolicy,
    /// Retry policy for rewriting each object
    pub item_retry: RetryPolicy,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            excluded_resources: DEFAULT_EXCLUDED_RESOURCES
                .iter()
                .map(ToString::to_string)
                .collect(),
            list_retry: RetryPolicy::listing(),
            item_retry: RetryPolicy::item_writes(),
        }
    }
}
