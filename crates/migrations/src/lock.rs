//! Lock coordination between concurrent runners
//!
//! Uses a PostgreSQL session-level advisory lock held on a dedicated
//! connection. If the process dies, the server ends the session and the lock
//! goes with it.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{LockError, LockFailureReason};

/// Lock resource key for one database
pub fn resource_key(namespace: &str, database: &str) -> String {
    format!("{}:{}", namespace, database)
}

/// Acquires the migration lock of one database
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    pool: PgPool,
    database: String,
    resource: String,
}

impl LockCoordinator {
    pub fn new(pool: PgPool, namespace: &str, database: impl Into<String>) -> Self {
        let database = database.into();
        Self {
            pool,
            resource: resource_key(namespace, &database),
            database,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn failure(&self, timeout: Duration, reason: LockFailureReason, source: Option<sqlx::Error>) -> LockError {
        let err = LockError {
            database: self.database.clone(),
            resource: self.resource.clone(),
            timeout_ms: timeout.as_millis() as u64,
            reason,
            source,
        };
        tracing::error!("{}", err);
        err
    }

    fn decode(&self, timeout: Duration, err: sqlx::Error) -> LockError {
        let reason = match &err {
            sqlx::Error::Database(db_err) => db_err
                .code()
                .map(|code| LockFailureReason::from_sqlstate(&code))
                .unwrap_or_else(|| LockFailureReason::Unknown("none".to_string())),
            _ => LockFailureReason::Unknown("client".to_string()),
        };
        self.failure(timeout, reason, Some(err))
    }

    /// Acquire the lock exclusively, waiting at most `timeout`.
    ///
    /// A zero timeout makes a single attempt.
    pub async fn acquire(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<LockHandle, LockError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| self.decode(timeout, e))?;

        tracing::info!(
            "Acquiring migration lock '{}' (timeout {}ms)",
            self.resource,
            timeout.as_millis()
        );

        let attempt = async {
            if timeout.is_zero() {
                return sqlx::query_scalar::<_, bool>(
                    "SELECT pg_try_advisory_lock(hashtextextended($1, 0))",
                )
                .bind(&self.resource)
                .fetch_one(&mut *conn)
                .await;
            }

            sqlx::query("SELECT set_config('lock_timeout', $1, false)")
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(&mut *conn)
                .await?;
            let result = sqlx::query("SELECT pg_advisory_lock(hashtextextended($1, 0))")
                .bind(&self.resource)
                .execute(&mut *conn)
                .await;
            sqlx::query("RESET lock_timeout").execute(&mut *conn).await?;
            result.map(|_| true)
        };

        let outcome = tokio::select! {
            outcome = attempt => Some(outcome),
            _ = cancel.cancelled() => None,
        };

        let Some(outcome) = outcome else {
            // The connection may be mid-query; closing it drops any lock it got
            drop(conn.detach());
            return Err(self.failure(timeout, LockFailureReason::Canceled, None));
        };

        match outcome {
            Ok(true) => {
                tracing::info!("Acquired migration lock '{}'", self.resource);
                Ok(LockHandle {
                    conn: Some(conn),
                    resource: self.resource.clone(),
                })
            }
            Ok(false) => Err(self.failure(timeout, LockFailureReason::Timeout, None)),
            Err(e) => {
                // lock_timeout may still be set on this session
                drop(conn.detach());
                Err(self.decode(timeout, e))
            }
        }
    }
}

/// Proof of holding the migration lock.
///
/// Call [`LockHandle::release`] when done. A handle dropped without release
/// closes its connection, which makes the server release the lock.
pub struct LockHandle {
    conn: Option<PoolConnection<Postgres>>,
    resource: String,
}

impl LockHandle {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Unlock and return the connection to the pool
    pub async fn release(mut self) -> Result<(), sqlx::Error> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let released: Result<bool, sqlx::Error> =
            sqlx::query_scalar("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
                .bind(&self.resource)
                .fetch_one(&mut *conn)
                .await;

        match released {
            Ok(true) => {
                tracing::info!("Released migration lock '{}'", self.resource);
                Ok(())
            }
            Ok(false) => {
                tracing::warn!(
                    "Migration lock '{}' was not held by this session at release",
                    self.resource
                );
                drop(conn.detach());
                Ok(())
            }
            Err(e) => {
                drop(conn.detach());
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("resource", &self.resource)
            .field("held", &self.conn.is_some())
            .finish()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(
                "Migration lock '{}' dropped without release; closing its connection",
                self.resource
            );
            drop(conn.detach());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key() {
        assert_eq!(resource_key("elif.migrations", "orders"), "elif.migrations:orders");
    }
}
