//! Migrates stored objects to the storage version their server currently writes.
//!
//! Resources served at more than one version are discovered, listed, and
//! every object is written back unchanged so the server re-encodes it.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod discovery;
mod error;
mod item;
mod migrator;
mod results;
mod retry;

pub use config::{DEFAULT_EXCLUDED_RESOURCES, MigratorConfig, RetryPolicy};
pub use discovery::{ResourceDiscoverer, migratable_resources};
pub use error::{Error, Result};
pub use item::ItemMigrator;
pub use migrator::StorageMigrator;
pub use results::{
    MigrationErrorKind, MigrationOutcome, MigrationStatus, OutcomeStatus, ResultAggregator,
    RunResult,
};
pub use retry::Backoff;
pub use tokio_util::sync::CancellationToken;
