//! Migration sources
//!
//! A source supplies migrations to the runner. Several sources may be
//! registered; their outputs are concatenated and validated as one set.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::migration::Migration;

pub mod directory;
pub mod embedded;
pub mod filename;

pub use directory::DirectorySource;
pub use embedded::EmbeddedSource;
pub use filename::{format_file_name, parse_file_name, ParsedFileName, MAX_FILE_VERSION};

/// Supplies a collection of migrations
#[async_trait]
pub trait MigrationSource: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Load every migration this source knows about.
    ///
    /// [`SourceError::NoMigrationsFound`] is a soft condition the runner only
    /// warns about; any other error aborts the run.
    async fn load_migrations(&self) -> Result<Vec<Migration>, SourceError>;
}

/// Fixed list of migrations built in code
pub struct StaticSource {
    name: String,
    migrations: Vec<Migration>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, migrations: Vec<Migration>) -> Self {
        Self {
            name: name.into(),
            migrations,
        }
    }
}

#[async_trait]
impl MigrationSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_migrations(&self) -> Result<Vec<Migration>, SourceError> {
        if self.migrations.is_empty() {
            return Err(SourceError::NoMigrationsFound {
                source_name: self.name.clone(),
            });
        }
        Ok(self.migrations.clone())
    }
}
