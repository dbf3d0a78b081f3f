//! Version ledger
//!
//! The ledger table records every applied migration. It bootstraps and
//! upgrades its own schema on each run; the upgrade path adds the
//! `is_snapshot` column to tables created before snapshots existed.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use crate::migration::Migration;
use crate::sql::{qualified_table, quote_ident};

/// One ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub is_snapshot: bool,
    pub applied_at: DateTime<Utc>,
}

/// Access to the ledger table of one database
#[derive(Debug, Clone)]
pub struct VersionLedger {
    schema: String,
    table: String,
}

impl VersionLedger {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Quoted, schema-qualified table name
    pub fn table_name(&self) -> String {
        qualified_table(&self.schema, &self.table)
    }

    /// SQL to create the ledger table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version BIGINT PRIMARY KEY,\n    \
                name TEXT NOT NULL,\n    \
                is_snapshot BOOLEAN NOT NULL DEFAULT FALSE,\n    \
                applied_at TIMESTAMPTZ NOT NULL\n\
            )",
            self.table_name()
        )
    }

    /// Statements upgrading a table that predates the `is_snapshot` column
    pub fn add_snapshot_column_sql(&self) -> Vec<String> {
        let table = self.table_name();
        vec![
            format!("ALTER TABLE {} ADD COLUMN IF NOT EXISTS is_snapshot BOOLEAN NULL", table),
            format!("UPDATE {} SET is_snapshot = FALSE WHERE is_snapshot IS NULL", table),
            format!("ALTER TABLE {} ALTER COLUMN is_snapshot SET DEFAULT FALSE", table),
            format!("ALTER TABLE {} ALTER COLUMN is_snapshot SET NOT NULL", table),
        ]
    }

    /// SQL to record a migration as applied
    pub fn record_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version, name, is_snapshot, applied_at) VALUES ($1, $2, $3, $4)",
            self.table_name()
        )
    }

    /// SQL to get applied migrations
    pub fn applied_versions_sql(&self) -> String {
        format!(
            "SELECT version, name, is_snapshot, applied_at FROM {} ORDER BY version",
            self.table_name()
        )
    }

    async fn table_exists(&self, conn: &mut PgConnection) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(&self.schema)
        .bind(&self.table)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.is_some())
    }

    async fn column_exists(&self, conn: &mut PgConnection, column: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT 1 FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 AND column_name = $3",
        )
        .bind(&self.schema)
        .bind(&self.table)
        .bind(column)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.is_some())
    }

    /// Create or upgrade the ledger table. Safe to run on every start.
    pub async fn ensure_table(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        // CREATE SCHEMA needs database-level CREATE even when the schema exists
        let schema_exists = sqlx::query("SELECT 1 FROM pg_namespace WHERE nspname = $1")
            .bind(&self.schema)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !schema_exists {
            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema)))
                .execute(&mut *tx)
                .await?;
        }

        if !self.table_exists(&mut tx).await? {
            tracing::info!("Creating version ledger {}", self.table_name());
            sqlx::query(&self.create_table_sql()).execute(&mut *tx).await?;
        } else if !self.column_exists(&mut tx, "is_snapshot").await? {
            tracing::info!("Adding is_snapshot column to version ledger {}", self.table_name());
            for statement in self.add_snapshot_column_sql() {
                sqlx::query(&statement).execute(&mut *tx).await?;
            }
        }

        tx.commit().await
    }

    /// Applied migrations ordered by version; empty when the table does not exist yet
    pub async fn applied_versions(&self, pool: &PgPool) -> Result<Vec<AppliedMigration>, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        if !self.table_exists(&mut conn).await? {
            return Ok(Vec::new());
        }

        // Read-only callers may see a legacy table that was never upgraded
        let sql = if self.column_exists(&mut conn, "is_snapshot").await? {
            self.applied_versions_sql()
        } else {
            self.applied_versions_sql()
                .replace("is_snapshot,", "FALSE AS is_snapshot,")
        };

        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

        rows.into_iter()
            .map(|row| {
                Ok(AppliedMigration {
                    version: row.try_get("version")?,
                    name: row.try_get("name")?,
                    is_snapshot: row.try_get("is_snapshot")?,
                    applied_at: row.try_get("applied_at")?,
                })
            })
            .collect()
    }

    /// Highest applied version, or 0 when nothing is applied
    pub async fn current_version(&self, pool: &PgPool) -> Result<i64, sqlx::Error> {
        Ok(current_version(&self.applied_versions(pool).await?))
    }

    /// Insert the ledger row for a migration inside the caller's transaction
    pub async fn record(&self, tx: &mut PgConnection, migration: &Migration) -> Result<(), sqlx::Error> {
        sqlx::query(&self.record_sql())
            .bind(migration.version())
            .bind(migration.name())
            .bind(migration.is_snapshot())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        Ok(())
    }
}

/// Highest version among ledger rows, or 0
pub fn current_version(applied: &[AppliedMigration]) -> i64 {
    applied.iter().map(|row| row.version).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_sql_generation() {
        let ledger = VersionLedger::new("public", "elif_version_info");

        let create_sql = ledger.create_table_sql();
        assert!(create_sql.contains("CREATE TABLE IF NOT EXISTS \"public\".\"elif_version_info\""));
        assert!(create_sql.contains("version BIGINT PRIMARY KEY"));
        assert!(create_sql.contains("is_snapshot BOOLEAN NOT NULL DEFAULT FALSE"));
        assert!(create_sql.contains("applied_at TIMESTAMPTZ NOT NULL"));

        let record_sql = ledger.record_sql();
        assert!(record_sql.starts_with("INSERT INTO \"public\".\"elif_version_info\""));
        assert!(record_sql.contains("$4"));

        assert!(ledger.applied_versions_sql().ends_with("ORDER BY version"));
    }

    #[test]
    fn test_legacy_read_substitutes_snapshot_flag() {
        let sql = VersionLedger::new("public", "elif_version_info")
            .applied_versions_sql()
            .replace("is_snapshot,", "FALSE AS is_snapshot,");
        assert!(sql.starts_with("SELECT version, name, FALSE AS is_snapshot, applied_at FROM"));
    }

    #[test]
    fn test_snapshot_column_upgrade_order() {
        let statements = VersionLedger::new("ops", "versions").add_snapshot_column_sql();
        assert_eq!(statements.len(), 4);
        assert!(statements[0].contains("ADD COLUMN IF NOT EXISTS is_snapshot BOOLEAN NULL"));
        assert!(statements[1].contains("SET is_snapshot = FALSE WHERE is_snapshot IS NULL"));
        assert!(statements[2].contains("SET DEFAULT FALSE"));
        assert!(statements[3].contains("SET NOT NULL"));
    }

    #[test]
    fn test_current_version() {
        assert_eq!(current_version(&[]), 0);

        let row = |version| AppliedMigration {
            version,
            name: format!("m{}", version),
            is_snapshot: false,
            applied_at: Utc::now(),
        };
        assert_eq!(current_version(&[row(3), row(1001), row(2)]), 1001);
    }
}
