//! Database provisioning
//!
//! Makes sure the target database exists before migrations run. All catalog
//! work happens on one connection to the maintenance database, since
//! PostgreSQL cannot create or drop the database a session is connected to.

use sqlx::{Connection, Executor, PgConnection};

use crate::config::{AutoCreate, MigrationConfig};
use crate::error::{MigrateResult, ProvisionError};
use crate::sql::{self, quote_ident};

/// What the provisioner did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Nothing checked (`AutoCreate::Never`)
    Skipped,
    /// Database was already there
    Existing,
    /// Database was created empty
    Created,
    /// Database was cloned from the restore source
    Restored,
}

/// Ensures the target database exists according to [`AutoCreate`]
#[derive(Debug, Clone)]
pub struct DatabaseProvisioner {
    mode: AutoCreate,
    database: String,
    maintenance_url: String,
    maintenance_database: String,
    restore_from: Option<String>,
}

impl DatabaseProvisioner {
    pub fn from_config(config: &MigrationConfig) -> MigrateResult<Self> {
        Ok(Self {
            mode: config.auto_create,
            database: config.database_name()?,
            maintenance_url: sql::with_database(&config.database_url, &config.maintenance_database)?,
            maintenance_database: config.maintenance_database.clone(),
            restore_from: config.restore_from.clone(),
        })
    }

    pub fn mode(&self) -> AutoCreate {
        self.mode
    }

    /// Run the configured provisioning mode
    pub async fn provision(&self) -> Result<ProvisionOutcome, ProvisionError> {
        if self.mode == AutoCreate::Never {
            return Ok(ProvisionOutcome::Skipped);
        }

        let mut conn = PgConnection::connect(&self.maintenance_url)
            .await
            .map_err(|source| ProvisionError::Connect {
                database: self.maintenance_database.clone(),
                source,
            })?;

        let outcome = self.provision_with(&mut conn).await;

        if let Err(e) = conn.close().await {
            tracing::warn!("Failed to close maintenance connection: {}", e);
        }

        outcome.inspect_err(|e| tracing::error!("Database provisioning failed: {}", e))
    }

    async fn provision_with(&self, conn: &mut PgConnection) -> Result<ProvisionOutcome, ProvisionError> {
        let exists = self.database_exists(conn, &self.database).await?;

        match (self.mode, exists) {
            (AutoCreate::Never, _) => Ok(ProvisionOutcome::Skipped),
            (AutoCreate::IfNotExists, true) => {
                tracing::info!("Database '{}' already exists", self.database);
                Ok(ProvisionOutcome::Existing)
            }
            (AutoCreate::IfNotExists, false) => self.create(conn).await,
            (AutoCreate::DropCreate, exists) => {
                if exists {
                    self.drop_database(conn).await?;
                }
                self.create(conn).await
            }
        }
    }

    async fn database_exists(&self, conn: &mut PgConnection, database: &str) -> Result<bool, ProvisionError> {
        let row = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(database)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|source| ProvisionError::Operation {
                operation: "look up",
                database: database.to_string(),
                source,
            })?;
        Ok(row.is_some())
    }

    async fn execute(
        &self,
        conn: &mut PgConnection,
        operation: &'static str,
        statement: &str,
    ) -> Result<(), ProvisionError> {
        tracing::debug!("{}", statement);
        // Simple query protocol: CREATE/DROP DATABASE refuse to run inside a transaction block
        (&mut *conn)
            .execute(statement)
            .await
            .map_err(|source| ProvisionError::Operation {
                operation,
                database: self.database.clone(),
                source,
            })?;
        Ok(())
    }

    async fn create(&self, conn: &mut PgConnection) -> Result<ProvisionOutcome, ProvisionError> {
        let target = quote_ident(&self.database);

        match &self.restore_from {
            Some(source) => {
                if !self.database_exists(conn, source).await? {
                    return Err(ProvisionError::SourceMissing {
                        source_database: source.clone(),
                    });
                }
                tracing::info!("Restoring database '{}' from '{}'", self.database, source);
                let statement = format!("CREATE DATABASE {} TEMPLATE {}", target, quote_ident(source));
                self.execute(conn, "restore", &statement)
                    .await
                    .map_err(|err| match err {
                        ProvisionError::Operation { source: db_err, .. } if is_object_in_use(&db_err) => {
                            ProvisionError::SourceInUse {
                                source_database: source.clone(),
                                source: db_err,
                            }
                        }
                        other => other,
                    })?;
                Ok(ProvisionOutcome::Restored)
            }
            None => {
                tracing::info!("Creating database '{}'", self.database);
                self.execute(conn, "create", &format!("CREATE DATABASE {}", target))
                    .await?;
                Ok(ProvisionOutcome::Created)
            }
        }
    }

    async fn drop_database(&self, conn: &mut PgConnection) -> Result<(), ProvisionError> {
        let target = quote_ident(&self.database);
        tracing::warn!("Dropping database '{}'", self.database);

        // Keep new sessions out, then end the existing ones
        self.execute(
            conn,
            "restrict connections to",
            &format!("ALTER DATABASE {} WITH ALLOW_CONNECTIONS false", target),
        )
        .await?;

        let dropped = self.disconnect_and_drop(conn, &target).await;
        if dropped.is_err() {
            // Still there: let sessions back in before reporting the failure
            let allow = format!("ALTER DATABASE {} WITH ALLOW_CONNECTIONS true", target);
            if let Err(e) = (&mut *conn).execute(allow.as_str()).await {
                tracing::warn!("Failed to re-allow connections to '{}': {}", self.database, e);
            }
        }
        dropped
    }

    async fn disconnect_and_drop(&self, conn: &mut PgConnection, target: &str) -> Result<(), ProvisionError> {
        sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(&self.database)
        .execute(&mut *conn)
        .await
        .map_err(|source| ProvisionError::Operation {
            operation: "disconnect sessions from",
            database: self.database.clone(),
            source,
        })?;

        self.execute(conn, "drop", &format!("DROP DATABASE IF EXISTS {}", target))
            .await
    }
}

/// SQLSTATE 55006, raised when a template database has other sessions
fn is_object_in_use(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("55006"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_points_at_maintenance_database() {
        let config = MigrationConfig::new("postgres://app:pw@db:5432/orders")
            .with_auto_create(AutoCreate::IfNotExists)
            .with_restore_from("orders_seed");

        let provisioner = DatabaseProvisioner::from_config(&config).unwrap();
        assert_eq!(provisioner.mode(), AutoCreate::IfNotExists);
        assert_eq!(provisioner.database, "orders");
        assert_eq!(provisioner.maintenance_url, "postgres://app:pw@db:5432/postgres");
        assert_eq!(provisioner.restore_from.as_deref(), Some("orders_seed"));
    }

    #[tokio::test]
    async fn test_never_mode_skips_without_connecting() {
        // Unreachable host: provisioning must not even try to connect
        let config = MigrationConfig::new("postgres://nobody@invalid.invalid:1/orders");
        let provisioner = DatabaseProvisioner::from_config(&config).unwrap();

        assert_eq!(provisioner.provision().await.unwrap(), ProvisionOutcome::Skipped);
    }
}
