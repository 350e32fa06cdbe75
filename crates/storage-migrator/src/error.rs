use std::error::Error as StdError;

use thiserror::Error;

/// Result type for the storage migrator.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that abort a migration run before any object is touched.
///
/// Failures scoped to one resource type or one object are recorded as
/// outcomes in the `RunResult` instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A discovery call failed.
    #[error("failed to {operation}: {source}")]
    Discovery {
        /// The discovery step that failed.
        operation: &'static str,

        /// The underlying client error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The run was cancelled during discovery.
    #[error("migration cancelled during discovery")]
    Cancelled,
}
