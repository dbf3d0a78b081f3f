//! Migrations loaded from `.sql` files in a directory

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::filename::{is_sql_file, parse_file_name};
use super::MigrationSource;
use crate::error::SourceError;
use crate::migration::Migration;

/// Loads every `VVV_VVV_VVV_VVV_name[.snapshot].sql` file of one directory
pub struct DirectorySource {
    dir: PathBuf,
    label: String,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let label = dir.display().to_string();
        Self { dir, label }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_error(&self, source: std::io::Error) -> SourceError {
        SourceError::Io {
            location: self.label.clone(),
            source,
        }
    }
}

#[async_trait]
impl MigrationSource for DirectorySource {
    fn name(&self) -> &str {
        &self.label
    }

    async fn load_migrations(&self) -> Result<Vec<Migration>, SourceError> {
        if !tokio::fs::try_exists(&self.dir)
            .await
            .map_err(|e| self.io_error(e))?
        {
            return Err(SourceError::NoMigrationsFound {
                source_name: self.label.clone(),
            });
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| self.io_error(e))?;

        let mut migrations = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.io_error(e))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(|e| self.io_error(e))?;
            if !file_type.is_file() {
                continue;
            }

            let file_name = match path.file_name().and_then(|name| name.to_str()) {
                Some(name) if is_sql_file(name) => name.to_string(),
                _ => continue,
            };

            let parsed = parse_file_name(&file_name)?;
            let sql = tokio::fs::read_to_string(&path).await.map_err(|e| SourceError::Io {
                location: path.display().to_string(),
                source: e,
            })?;

            tracing::debug!("Loaded migration file {}", file_name);
            migrations.push(if parsed.is_snapshot {
                Migration::snapshot(parsed.version, parsed.name, sql)
            } else {
                Migration::sql(parsed.version, parsed.name, sql)
            });
        }

        if migrations.is_empty() {
            return Err(SourceError::NoMigrationsFound {
                source_name: self.label.clone(),
            });
        }

        migrations.sort_by_key(|m| (m.version(), m.is_snapshot()));
        Ok(migrations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_migrations() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("000_000_000_002_add_posts.sql"),
            "CREATE TABLE posts (id BIGINT);",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("000_000_000_001_add_users.sql"),
            "CREATE TABLE users (id BIGINT);",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("000_000_000_002_baseline.snapshot.sql"),
            "CREATE TABLE users (id BIGINT);\nGO\nCREATE TABLE posts (id BIGINT);",
        )
        .unwrap();
        fs::write(temp_dir.path().join("README.md"), "not a migration").unwrap();
        fs::create_dir(temp_dir.path().join("000_000_000_009_nested.sql")).unwrap();

        let source = DirectorySource::new(temp_dir.path());
        let migrations = source.load_migrations().await.unwrap();

        assert_eq!(migrations.len(), 3);
        assert_eq!(migrations[0].version(), 1);
        assert_eq!(migrations[0].name(), "add users");
        assert_eq!(migrations[1].version(), 2);
        assert!(!migrations[1].is_snapshot());
        assert!(migrations[2].is_snapshot());
        assert_eq!(migrations[2].name(), "baseline");
    }

    #[tokio::test]
    async fn test_missing_directory_is_soft() {
        let temp_dir = TempDir::new().unwrap();
        let source = DirectorySource::new(temp_dir.path().join("missing"));

        let err = source.load_migrations().await.unwrap_err();
        assert!(err.is_soft());
    }

    #[tokio::test]
    async fn test_empty_directory_is_soft() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "nothing here").unwrap();

        let err = DirectorySource::new(temp_dir.path())
            .load_migrations()
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NoMigrationsFound { .. }));
    }

    #[tokio::test]
    async fn test_malformed_sql_file_name_is_hard() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("add_users.sql"), "SELECT 1;").unwrap();

        let err = DirectorySource::new(temp_dir.path())
            .load_migrations()
            .await
            .unwrap_err();
        assert!(!err.is_soft());
        assert!(matches!(err, SourceError::InvalidFileName { ref file_name, .. } if file_name == "add_users.sql"));
    }
}
