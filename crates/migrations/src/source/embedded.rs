//! Migrations compiled into the binary

use async_trait::async_trait;

use super::filename::{is_sql_file, parse_file_name};
use super::MigrationSource;
use crate::error::SourceError;
use crate::migration::Migration;

/// Migrations from a static manifest of `(file name, contents)` pairs.
///
/// ```rust
/// use elif_migrations::EmbeddedSource;
///
/// static MIGRATIONS: &[(&str, &str)] = &[
///     ("000_000_000_001_create_users.sql", "CREATE TABLE users (id BIGINT PRIMARY KEY);"),
/// ];
///
/// let source = EmbeddedSource::new("app", MIGRATIONS);
/// ```
pub struct EmbeddedSource {
    name: String,
    files: &'static [(&'static str, &'static str)],
}

impl EmbeddedSource {
    pub fn new(name: impl Into<String>, files: &'static [(&'static str, &'static str)]) -> Self {
        Self {
            name: name.into(),
            files,
        }
    }
}

#[async_trait]
impl MigrationSource for EmbeddedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_migrations(&self) -> Result<Vec<Migration>, SourceError> {
        let mut migrations = Vec::with_capacity(self.files.len());

        for (file_name, sql) in self.files.iter().filter(|(name, _)| is_sql_file(name)) {
            let parsed = parse_file_name(file_name)?;
            migrations.push(if parsed.is_snapshot {
                Migration::snapshot(parsed.version, parsed.name, *sql)
            } else {
                Migration::sql(parsed.version, parsed.name, *sql)
            });
        }

        if migrations.is_empty() {
            return Err(SourceError::NoMigrationsFound {
                source_name: self.name.clone(),
            });
        }

        migrations.sort_by_key(|m| (m.version(), m.is_snapshot()));
        Ok(migrations)
    }
}
