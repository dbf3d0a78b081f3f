//! # elif-migrations
//!
//! Forward-only schema migrations for PostgreSQL.
//!
//! A [`MigrationRunner`] collects migrations from one or more
//! [`MigrationSource`]s, validates them, and applies the pending ones while
//! holding a database-wide advisory lock, so that several application
//! instances starting at once never run the same migration twice.
//!
//! ```no_run
//! use elif_migrations::{MigrationConfig, MigrationRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> elif_migrations::MigrateResult<()> {
//! let config = MigrationConfig::from_env()?;
//! let mut runner = MigrationRunner::from_config(config);
//! let result = runner.run(&CancellationToken::new()).await?;
//! println!("applied {} migration(s)", result.applied_count);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod migration;
pub mod provisioner;
pub mod runner;
pub mod source;
pub mod splitter;
pub mod sql;
pub mod validator;

pub use config::{AutoCreate, ConfigSource, MigrationConfig};
pub use error::{
    BoxError, ConfigError, ConsistencyError, LockError, LockFailureReason, MigrateError, MigrateResult,
    ProvisionError, SourceError, ValidationError,
};
pub use ledger::{AppliedMigration, VersionLedger};
pub use lock::{LockCoordinator, LockHandle};
pub use migration::{version_family, Migration, MigrationBody, SqlScript, FAMILY_SIZE};
pub use provisioner::{DatabaseProvisioner, ProvisionOutcome};
pub use runner::{
    plan_migrations, MigrationPlan, MigrationRunResult, MigrationRunner, MigrationStatus, MigrationStatusEntry,
    RunnerState,
};
pub use source::{
    format_file_name, DirectorySource, EmbeddedSource, MigrationSource, StaticSource, MAX_FILE_VERSION,
};
pub use splitter::split_batches;
pub use validator::{validate_offline, validate_online};
