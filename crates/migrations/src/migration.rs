//! Migration definitions
//!
//! A [`Migration`] is an immutable, versioned unit of work. Its body is any
//! [`MigrationBody`]; SQL files use the built-in [`SqlScript`].

use async_trait::async_trait;
use sqlx::{Executor, PgConnection};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BoxError;
use crate::splitter::split_batches;

/// Number of versions in one family
pub const FAMILY_SIZE: i64 = 1000;

/// Family a version belongs to
pub fn version_family(version: i64) -> i64 {
    version / FAMILY_SIZE
}

/// Executable part of a migration.
///
/// `tx` is the connection of the serializable transaction opened by the
/// runner; the ledger row for the migration is written in the same
/// transaction. `timeout` is the configured per-statement timeout, already
/// applied server-side as `statement_timeout`.
#[async_trait]
pub trait MigrationBody: Send + Sync {
    async fn apply(&self, tx: &mut PgConnection, timeout: Duration) -> Result<(), BoxError>;
}

/// SQL text executed batch by batch
#[derive(Debug, Clone)]
pub struct SqlScript {
    sql: String,
}

impl SqlScript {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn batches(&self) -> Vec<String> {
        split_batches(&self.sql)
    }
}

#[async_trait]
impl MigrationBody for SqlScript {
    async fn apply(&self, tx: &mut PgConnection, _timeout: Duration) -> Result<(), BoxError> {
        for batch in self.batches() {
            tracing::debug!("Executing batch: {}", batch);
            // No bind parameters: the simple query protocol allows several statements per batch
            (&mut *tx).execute(batch.as_str()).await?;
        }
        Ok(())
    }
}

/// Represents a database migration
#[derive(Clone)]
pub struct Migration {
    version: i64,
    name: String,
    is_snapshot: bool,
    body: Arc<dyn MigrationBody>,
}

impl Migration {
    /// Create a migration with a custom body
    pub fn new(
        version: i64,
        name: impl Into<String>,
        is_snapshot: bool,
        body: Arc<dyn MigrationBody>,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            is_snapshot,
            body,
        }
    }

    /// Regular migration running a SQL script
    pub fn sql(version: i64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(version, name, false, Arc::new(SqlScript::new(sql)))
    }

    /// Snapshot migration running a SQL script
    pub fn snapshot(version: i64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(version, name, true, Arc::new(SqlScript::new(sql)))
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_snapshot(&self) -> bool {
        self.is_snapshot
    }

    pub fn family(&self) -> i64 {
        version_family(self.version)
    }

    pub fn body(&self) -> &Arc<dyn MigrationBody> {
        &self.body
    }

    /// Short form used in logs and error messages
    pub fn label(&self) -> String {
        if self.is_snapshot {
            format!("{} '{}' (snapshot)", self.version, self.name)
        } else {
            format!("{} '{}'", self.version, self.name)
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("is_snapshot", &self.is_snapshot)
            .finish_non_exhaustive()
    }
}
