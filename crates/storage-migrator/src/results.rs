//! Per-object outcomes and their aggregation into a run result.

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use proven_resource_api::{GroupVersionResource, NamespacedName};
use serde::{Serialize, Serializer};

/// Why an object or resource type could not be migrated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum MigrationErrorKind {
    /// Listing the resource type failed.
    ListFailed,

    /// The task migrating the resource type panicked.
    TaskFailed,

    /// The object's metadata could not be read.
    Metadata,

    /// The API returned an error that retrying cannot fix.
    NonRetryable,

    /// The item retry policy ran out of attempts or time.
    RetriesExhausted,

    /// The run was cancelled.
    Cancelled,
}

impl Display for MigrationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The terminal state of one object, or of a whole resource type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OutcomeStatus {
    /// The object was rewritten.
    Success,

    /// The object was deleted before it could be rewritten.
    NotFoundSkipped,

    /// The object, or type, could not be migrated.
    Error {
        /// Classification of the failure.
        kind: MigrationErrorKind,

        /// Human readable description.
        message: String,
    },
}

impl OutcomeStatus {
    /// Returns true unless this is an error.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }

    /// The error kind, if this is an error.
    #[must_use]
    pub const fn error_kind(&self) -> Option<MigrationErrorKind> {
        match self {
            Self::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

fn serialize_error<S: Serializer>(
    status: &OutcomeStatus,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match status {
        OutcomeStatus::Error { message, .. } => serializer.serialize_str(message),
        _ => serializer.serialize_none(),
    }
}

/// The outcome of migrating one object, or a whole resource type when
/// `namespaced_name` is `None`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    /// The resource type, addressed at its representative version.
    pub resource_version: GroupVersionResource,

    /// The object, if the outcome concerns a single object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaced_name: Option<NamespacedName>,

    /// What happened.
    #[serde(
        rename = "error",
        serialize_with = "serialize_error",
        skip_serializing_if = "OutcomeStatus::is_ok"
    )]
    pub status: OutcomeStatus,

    /// When the outcome was recorded.
    pub timestamp: DateTime<Utc>,
}

impl MigrationOutcome {
    /// Creates an outcome stamped with the current time.
    #[must_use]
    pub fn new(
        resource_version: GroupVersionResource,
        namespaced_name: Option<NamespacedName>,
        status: OutcomeStatus,
    ) -> Self {
        Self {
            resource_version,
            namespaced_name,
            status,
            timestamp: Utc::now(),
        }
    }

    /// Creates an error outcome.
    #[must_use]
    pub fn error(
        resource_version: GroupVersionResource,
        namespaced_name: Option<NamespacedName>,
        kind: MigrationErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            resource_version,
            namespaced_name,
            OutcomeStatus::Error {
                kind,
                message: message.into(),
            },
        )
    }

    /// Returns true if the run was cancelled while producing this outcome.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status.error_kind() == Some(MigrationErrorKind::Cancelled)
    }
}

/// Overall status of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum MigrationStatus {
    /// Every outcome was a success or a skip.
    Success,

    /// At least one outcome was an error.
    Failure,
}

/// The result of a completed migration run.
#[derive(Clone, Debug, Serialize)]
pub struct RunResult {
    /// Overall status.
    pub status: MigrationStatus,

    /// Outcomes in the order their batches were recorded.
    pub items: Vec<MigrationOutcome>,
}

impl RunResult {
    /// Returns true if no outcome was an error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == MigrationStatus::Success
    }

    /// Iterates over the error outcomes.
    pub fn errors(&self) -> impl Iterator<Item = &MigrationOutcome> {
        self.items.iter().filter(|outcome| !outcome.status.is_ok())
    }
}

/// Collects outcomes from concurrently running tasks.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    outcomes: Mutex<Vec<MigrationOutcome>>,
}

impl ResultAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task's outcomes as one contiguous batch.
    pub fn append(&self, batch: Vec<MigrationOutcome>) {
        self.outcomes.lock().extend(batch);
    }

    /// Takes every recorded outcome and computes the overall status.
    pub fn finish(&self) -> RunResult {
        let items = std::mem::take(&mut *self.outcomes.lock());
        let status = if items.iter().all(|outcome| outcome.status.is_ok()) {
            MigrationStatus::Success
        } else {
            MigrationStatus::Failure
        };

        RunResult { status, items }
    }
}
