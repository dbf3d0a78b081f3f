//! Migration Runner - Brings a database to the latest known version
//!
//! Provisions the database, loads and validates migrations, takes the
//! advisory lock, checks the ledger against the code and applies every
//! pending migration in its own serializable transaction.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::MigrationConfig;
use crate::error::{BoxError, MigrateError, MigrateResult};
use crate::ledger::{current_version, AppliedMigration, VersionLedger};
use crate::lock::LockCoordinator;
use crate::migration::Migration;
use crate::provisioner::DatabaseProvisioner;
use crate::source::{DirectorySource, MigrationSource};
use crate::validator::{validate_offline, validate_online};

/// Phases of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Provisioning,
    Discovering,
    OfflineValidating,
    LockAcquiring,
    OnlineValidating,
    Executing,
    Complete,
    Failed,
}

/// Result of running migrations
#[derive(Debug, Clone, Default)]
pub struct MigrationRunResult {
    /// Number of migrations that were applied
    pub applied_count: usize,
    /// Labels of migrations that were applied, in order
    pub applied_migrations: Vec<String>,
    /// Number of migrations already recorded in the ledger
    pub skipped_count: usize,
    /// Ledger version before the run; `None` when the database was not consulted
    pub starting_version: Option<i64>,
    /// Ledger version after the run; `None` when the database was not consulted
    pub final_version: Option<i64>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied { applied_at: DateTime<Utc> },
    /// Recorded in the ledger but unknown to the code
    Unknown { applied_at: DateTime<Utc> },
}

/// One line of a status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatusEntry {
    pub version: i64,
    pub name: String,
    pub is_snapshot: bool,
    pub status: MigrationStatus,
}

/// Ordered work for one run
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Version below which regular migrations are considered covered
    pub baseline: i64,
    /// Snapshot chosen to initialise an empty database
    pub snapshot: Option<Migration>,
    /// Migrations to apply, snapshot first
    pub migrations: Vec<Migration>,
}

/// Compute the ordered pending list.
///
/// On an empty ledger with snapshots enabled, the newest snapshot runs first
/// and only regular migrations above it follow.
pub fn plan_migrations(migrations: &[Migration], current: i64, snapshots_enabled: bool) -> MigrationPlan {
    let snapshot = if current == 0 && snapshots_enabled {
        migrations
            .iter()
            .filter(|m| m.is_snapshot())
            .max_by_key(|m| m.version())
            .cloned()
    } else {
        None
    };

    let baseline = snapshot.as_ref().map_or(current, |s| s.version());

    let mut pending: Vec<Migration> = migrations
        .iter()
        .filter(|m| !m.is_snapshot() && m.version() > baseline)
        .cloned()
        .collect();
    pending.sort_by_key(|m| m.version());

    let mut ordered = Vec::with_capacity(pending.len() + 1);
    ordered.extend(snapshot.clone());
    ordered.extend(pending);

    MigrationPlan {
        baseline,
        snapshot,
        migrations: ordered,
    }
}

/// Runs migrations from registered sources against one database
pub struct MigrationRunner {
    config: MigrationConfig,
    sources: Vec<Box<dyn MigrationSource>>,
    state: RunnerState,
}

impl MigrationRunner {
    /// Create a runner with no sources
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            config,
            sources: Vec::new(),
            state: RunnerState::Idle,
        }
    }

    /// Create a runner loading from the configured migrations directory
    pub fn from_config(config: MigrationConfig) -> Self {
        let dir = config.migrations_dir.clone();
        Self::new(config).with_source(DirectorySource::new(dir))
    }

    /// Register an additional source
    pub fn with_source(mut self, source: impl MigrationSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    fn transition(&mut self, next: RunnerState) {
        tracing::info!("Migration runner: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn ledger(&self) -> VersionLedger {
        VersionLedger::new(&self.config.ledger_schema, &self.config.ledger_table)
    }

    /// Load migrations from every source.
    ///
    /// Returns `None` when every source reported only that it has no migrations.
    async fn discover(&self) -> MigrateResult<Option<Vec<Migration>>> {
        let mut migrations = Vec::new();
        let mut any_loaded = self.sources.is_empty();

        for source in &self.sources {
            match source.load_migrations().await {
                Ok(loaded) => {
                    tracing::info!("Loaded {} migration(s) from {}", loaded.len(), source.name());
                    any_loaded = true;
                    migrations.extend(loaded);
                }
                Err(e) if e.is_soft() => tracing::warn!("{}", e),
                Err(e) => {
                    tracing::error!("Failed to load migrations from {}: {}", source.name(), e);
                    return Err(e.into());
                }
            }
        }

        Ok(any_loaded.then_some(migrations))
    }

    async fn connect(&self) -> MigrateResult<PgPool> {
        // One connection holds the lock, one does the work
        PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&self.config.database_url)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to migration target: {}", e);
                MigrateError::Database(e)
            })
    }

    /// Bring the database to the latest known version
    pub async fn run(&mut self, cancel: &CancellationToken) -> MigrateResult<MigrationRunResult> {
        let result = self.run_inner(cancel).await;
        match &result {
            Ok(_) => self.transition(RunnerState::Complete),
            Err(e) => {
                tracing::error!("Migration run failed: {}", e);
                self.transition(RunnerState::Failed);
            }
        }
        result
    }

    async fn run_inner(&mut self, cancel: &CancellationToken) -> MigrateResult<MigrationRunResult> {
        let start_time = Instant::now();
        self.config.validate()?;
        let database = self.config.database_name()?;

        self.transition(RunnerState::Provisioning);
        DatabaseProvisioner::from_config(&self.config)?
            .provision()
            .await?;

        self.transition(RunnerState::Discovering);
        let Some(migrations) = self.discover().await? else {
            tracing::warn!("No migrations found in any source; nothing to do");
            return Ok(MigrationRunResult {
                execution_time_ms: start_time.elapsed().as_millis(),
                ..MigrationRunResult::default()
            });
        };

        self.transition(RunnerState::OfflineValidating);
        validate_offline(&migrations)?;

        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        let pool = self.connect().await?;

        self.transition(RunnerState::LockAcquiring);
        let lock = if self.config.lock_enabled {
            let coordinator = LockCoordinator::new(pool.clone(), &self.config.lock_namespace, &database);
            match coordinator.acquire(self.config.lock_timeout(), cancel).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    pool.close().await;
                    return Err(e.into());
                }
            }
        } else {
            tracing::warn!(
                "Migration lock disabled; concurrent runs against '{}' are not serialized",
                database
            );
            None
        };

        let outcome = self.migrate(&pool, &migrations, cancel).await;

        if let Some(lock) = lock {
            if let Err(e) = lock.release().await {
                tracing::warn!("Failed to release migration lock: {}", e);
            }
        }
        pool.close().await;

        let mut result = outcome?;
        result.execution_time_ms = start_time.elapsed().as_millis();
        tracing::info!(
            "Database '{}' is at version {} ({} migration(s) applied)",
            database,
            result.final_version.unwrap_or(0),
            result.applied_count
        );
        Ok(result)
    }

    async fn migrate(
        &mut self,
        pool: &PgPool,
        migrations: &[Migration],
        cancel: &CancellationToken,
    ) -> MigrateResult<MigrationRunResult> {
        self.transition(RunnerState::OnlineValidating);
        let ledger = self.ledger();
        ledger.ensure_table(pool).await.inspect_err(|e| {
            tracing::error!("Failed to prepare version ledger {}: {}", ledger.table_name(), e)
        })?;

        let applied = ledger.applied_versions(pool).await?;
        validate_online(&applied, migrations)?;

        let starting_version = current_version(&applied);
        let plan = plan_migrations(migrations, starting_version, self.config.snapshots_enabled);
        if let Some(snapshot) = &plan.snapshot {
            tracing::info!("Empty ledger: starting from snapshot {}", snapshot.label());
        }
        tracing::info!(
            "Current version {}, {} pending migration(s)",
            starting_version,
            plan.migrations.len()
        );

        self.transition(RunnerState::Executing);
        let mut result = MigrationRunResult {
            skipped_count: applied.len(),
            starting_version: Some(starting_version),
            final_version: Some(starting_version),
            ..MigrationRunResult::default()
        };

        for migration in &plan.migrations {
            if cancel.is_cancelled() {
                tracing::warn!("Cancelled before migration {}", migration.label());
                return Err(MigrateError::Cancelled);
            }

            tracing::info!("Applying migration {}", migration.label());
            let applied_at = Instant::now();

            self.apply(pool, &ledger, migration, cancel).await.inspect_err(|e| {
                if !matches!(e, MigrateError::Cancelled) {
                    tracing::error!("Migration {} failed: {}", migration.label(), e);
                }
            })?;

            tracing::info!(
                "Applied migration {} in {}ms",
                migration.label(),
                applied_at.elapsed().as_millis()
            );
            result.applied_count += 1;
            result.applied_migrations.push(migration.label());
            result.final_version = Some(migration.version().max(result.final_version.unwrap_or(0)));
        }

        Ok(result)
    }

    /// Ledger row and body in one serializable transaction.
    ///
    /// Cancellation is only observed while the ledger row and body run; once
    /// they finish the transaction is committed.
    async fn apply(
        &self,
        pool: &PgPool,
        ledger: &VersionLedger,
        migration: &Migration,
        cancel: &CancellationToken,
    ) -> MigrateResult<()> {
        let failed = |source: BoxError| MigrateError::Execution {
            version: migration.version(),
            name: migration.name().to_string(),
            source,
        };
        let timeout = self.config.command_timeout();
        let mut tx = pool.begin().await.map_err(|e| failed(e.into()))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| failed(e.into()))?;
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(timeout.as_millis().to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| failed(e.into()))?;

        tokio::select! {
            biased;
            outcome = write_migration(&mut *tx, ledger, migration, timeout) => outcome.map_err(failed)?,
            _ = cancel.cancelled() => {
                // Dropping the open transaction rolls it back
                tracing::warn!("Cancelled during migration {}; rolling back", migration.label());
                return Err(MigrateError::Cancelled);
            }
        }

        tx.commit().await.map_err(|e| failed(e.into()))?;
        Ok(())
    }

    /// Validate the migration set without touching the database
    pub async fn validate(&self) -> MigrateResult<usize> {
        let migrations = self.discover().await?.unwrap_or_default();
        validate_offline(&migrations)?;
        Ok(migrations.len())
    }

    /// Report every known migration as applied or pending
    pub async fn status(&self) -> MigrateResult<Vec<MigrationStatusEntry>> {
        self.config.validate()?;
        let migrations = self.discover().await?.unwrap_or_default();

        let pool = self.connect().await?;
        let applied = self.ledger().applied_versions(&pool).await;
        pool.close().await;

        Ok(status_report(&migrations, &applied?))
    }
}

async fn write_migration(
    tx: &mut PgConnection,
    ledger: &VersionLedger,
    migration: &Migration,
    timeout: Duration,
) -> Result<(), BoxError> {
    ledger.record(tx, migration).await?;
    migration.body().apply(tx, timeout).await
}

/// Merge known migrations and ledger rows into one ordered report
pub fn status_report(migrations: &[Migration], applied: &[AppliedMigration]) -> Vec<MigrationStatusEntry> {
    let mut rows: HashMap<(i64, bool), &AppliedMigration> = applied
        .iter()
        .map(|row| ((row.version, row.is_snapshot), row))
        .collect();

    let mut entries: Vec<MigrationStatusEntry> = migrations
        .iter()
        .map(|m| MigrationStatusEntry {
            version: m.version(),
            name: m.name().to_string(),
            is_snapshot: m.is_snapshot(),
            status: match rows.remove(&(m.version(), m.is_snapshot())) {
                Some(row) => MigrationStatus::Applied {
                    applied_at: row.applied_at,
                },
                None => MigrationStatus::Pending,
            },
        })
        .collect();

    entries.extend(rows.into_values().map(|row| MigrationStatusEntry {
        version: row.version,
        name: row.name.clone(),
        is_snapshot: row.is_snapshot,
        status: MigrationStatus::Unknown {
            applied_at: row.applied_at,
        },
    }));

    entries.sort_by_key(|e| (e.version, !e.is_snapshot));
    entries
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
