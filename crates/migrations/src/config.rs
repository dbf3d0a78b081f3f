//! Migration configuration
//!
//! Settings can come from defaults, a YAML file, `ELIF_MIGRATE_*` environment
//! variables or the builder methods, in that order of precedence when the CLI
//! layers them.

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::sql;

/// How the runner treats a missing target database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoCreate {
    /// Assume the database exists
    #[default]
    Never,
    /// Create the database when the server catalog does not list it
    IfNotExists,
    /// Drop the database if present, then create it (ephemeral environments only)
    DropCreate,
}

impl FromStr for AutoCreate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "never" => Ok(AutoCreate::Never),
            "if_not_exists" => Ok(AutoCreate::IfNotExists),
            "drop_create" => Ok(AutoCreate::DropCreate),
            _ => Err(ConfigError::invalid_value(
                "auto_create",
                s,
                "never, if_not_exists, or drop_create",
            )),
        }
    }
}

impl std::fmt::Display for AutoCreate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self {
            AutoCreate::Never => "never",
            AutoCreate::IfNotExists => "if_not_exists",
            AutoCreate::DropCreate => "drop_create",
        };
        write!(f, "{}", mode)
    }
}

/// Where a configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value loaded from environment variable
    EnvVar(String),
    /// Default value used
    Default(String),
    /// Value loaded from file
    File(String),
    /// Value provided programmatically
    Programmatic,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::EnvVar(var) => write!(f, "Environment variable: {}", var),
            ConfigSource::Default(value) => write!(f, "Default value: {}", value),
            ConfigSource::File(path) => write!(f, "Configuration file: {}", path),
            ConfigSource::Programmatic => write!(f, "Programmatically set"),
        }
    }
}

const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_DIR: &str = "ELIF_MIGRATE_DIR";
const ENV_AUTO_CREATE: &str = "ELIF_MIGRATE_AUTO_CREATE";
const ENV_SNAPSHOTS: &str = "ELIF_MIGRATE_SNAPSHOTS";
const ENV_LEDGER_SCHEMA: &str = "ELIF_MIGRATE_LEDGER_SCHEMA";
const ENV_LEDGER_TABLE: &str = "ELIF_MIGRATE_LEDGER_TABLE";
const ENV_COMMAND_TIMEOUT: &str = "ELIF_MIGRATE_COMMAND_TIMEOUT_SECS";
const ENV_LOCK_ENABLED: &str = "ELIF_MIGRATE_LOCK";
const ENV_LOCK_TIMEOUT: &str = "ELIF_MIGRATE_LOCK_TIMEOUT_MS";
const ENV_LOCK_NAMESPACE: &str = "ELIF_MIGRATE_LOCK_NAMESPACE";
const ENV_RESTORE_FROM: &str = "ELIF_MIGRATE_RESTORE_FROM";
const ENV_MAINTENANCE_DB: &str = "ELIF_MIGRATE_MAINTENANCE_DB";

/// Configuration for the migration system
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    /// Connection URL of the target database
    pub database_url: String,
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Database provisioning mode
    pub auto_create: AutoCreate,
    /// Start an empty database from the newest snapshot
    pub snapshots_enabled: bool,
    /// Schema holding the ledger table
    pub ledger_schema: String,
    /// Table name for tracking applied migrations
    pub ledger_table: String,
    /// Per-statement timeout inside migration transactions
    pub command_timeout_secs: u64,
    /// Serialize concurrent runners with an advisory lock
    pub lock_enabled: bool,
    /// How long to wait for the advisory lock
    pub lock_timeout_ms: u64,
    /// Namespace prefix of the lock resource key
    pub lock_namespace: String,
    /// Clone a new database from this one instead of creating it empty
    pub restore_from: Option<String>,
    /// Database used for catalog queries and CREATE/DROP DATABASE
    pub maintenance_database: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            migrations_dir: PathBuf::from("migrations"),
            auto_create: AutoCreate::Never,
            snapshots_enabled: false,
            ledger_schema: "public".to_string(),
            ledger_table: "elif_version_info".to_string(),
            command_timeout_secs: 30,
            lock_enabled: true,
            lock_timeout_ms: 60_000,
            lock_namespace: "elif.migrations".to_string(),
            restore_from: None,
            maintenance_database: "postgres".to_string(),
        }
    }
}

fn parse_env<T: FromStr>(var: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid_value(var, raw, expected)),
        Err(_) => Ok(None),
    }
}

impl MigrationConfig {
    /// Create a configuration for the given database with defaults elsewhere
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file; missing keys keep their defaults
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: MigrationConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields with any `DATABASE_URL` / `ELIF_MIGRATE_*` variables that are set
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Ok(dir) = env::var(ENV_DIR) {
            self.migrations_dir = PathBuf::from(dir);
        }
        if let Some(mode) = parse_env(ENV_AUTO_CREATE, "never, if_not_exists, or drop_create")? {
            self.auto_create = mode;
        }
        if let Some(enabled) = parse_env(ENV_SNAPSHOTS, "true or false")? {
            self.snapshots_enabled = enabled;
        }
        if let Ok(schema) = env::var(ENV_LEDGER_SCHEMA) {
            self.ledger_schema = schema;
        }
        if let Ok(table) = env::var(ENV_LEDGER_TABLE) {
            self.ledger_table = table;
        }
        if let Some(secs) = parse_env(ENV_COMMAND_TIMEOUT, "timeout in seconds")? {
            self.command_timeout_secs = secs;
        }
        if let Some(enabled) = parse_env(ENV_LOCK_ENABLED, "true or false")? {
            self.lock_enabled = enabled;
        }
        if let Some(ms) = parse_env(ENV_LOCK_TIMEOUT, "timeout in milliseconds")? {
            self.lock_timeout_ms = ms;
        }
        if let Ok(namespace) = env::var(ENV_LOCK_NAMESPACE) {
            self.lock_namespace = namespace;
        }
        if let Ok(source) = env::var(ENV_RESTORE_FROM) {
            self.restore_from = Some(source).filter(|s| !s.is_empty());
        }
        if let Ok(database) = env::var(ENV_MAINTENANCE_DB) {
            self.maintenance_database = database;
        }
        Ok(())
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    pub fn with_auto_create(mut self, mode: AutoCreate) -> Self {
        self.auto_create = mode;
        self
    }

    pub fn with_snapshots(mut self, enabled: bool) -> Self {
        self.snapshots_enabled = enabled;
        self
    }

    pub fn with_ledger_table(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.ledger_schema = schema.into();
        self.ledger_table = table.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_secs = timeout.as_secs();
        self
    }

    /// Enable or disable the advisory lock.
    ///
    /// Without the lock, concurrent runners are not serialized and may fail on
    /// the ledger's primary key.
    pub fn with_lock(mut self, enabled: bool) -> Self {
        self.lock_enabled = enabled;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_restore_from(mut self, source: impl Into<String>) -> Self {
        self.restore_from = Some(source.into());
        self
    }

    /// Per-statement timeout as a duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Lock wait as a duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Name of the target database
    pub fn database_name(&self) -> Result<String, ConfigError> {
        sql::database_name(&self.database_url)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::missing_required(
                "database_url",
                "DATABASE_URL environment variable or --database-url is required",
            ));
        }

        let database = self.database_name()?;

        for (field, value) in [
            ("ledger_schema", &self.ledger_schema),
            ("ledger_table", &self.ledger_table),
            ("lock_namespace", &self.lock_namespace),
            ("maintenance_database", &self.maintenance_database),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid_value(field, value.as_str(), "non-empty value"));
            }
        }

        if self.command_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "command_timeout_secs",
                "0",
                "timeout of at least one second",
            ));
        }

        if let Some(source) = &self.restore_from {
            if source == &database {
                return Err(ConfigError::invalid_value(
                    "restore_from",
                    source.as_str(),
                    "a database other than the migration target",
                ));
            }
        }

        if self.maintenance_database == database && self.auto_create != AutoCreate::Never {
            return Err(ConfigError::invalid_value(
                "maintenance_database",
                self.maintenance_database.as_str(),
                "a database other than the one being provisioned",
            ));
        }

        Ok(())
    }

    /// Get configuration source information for debugging
    pub fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let defaults = Self::default();
        let mut sources = HashMap::new();

        let mut record = |field: &str, var: &str, is_default: bool, default: String| {
            let source = if env::var(var).is_ok() {
                ConfigSource::EnvVar(var.to_string())
            } else if is_default {
                ConfigSource::Default(default)
            } else {
                ConfigSource::Programmatic
            };
            sources.insert(field.to_string(), source);
        };

        record(
            "database_url",
            ENV_DATABASE_URL,
            self.database_url.is_empty(),
            "none".to_string(),
        );
        record(
            "migrations_dir",
            ENV_DIR,
            self.migrations_dir == defaults.migrations_dir,
            defaults.migrations_dir.display().to_string(),
        );
        record(
            "auto_create",
            ENV_AUTO_CREATE,
            self.auto_create == defaults.auto_create,
            defaults.auto_create.to_string(),
        );
        record(
            "snapshots_enabled",
            ENV_SNAPSHOTS,
            self.snapshots_enabled == defaults.snapshots_enabled,
            defaults.snapshots_enabled.to_string(),
        );
        record(
            "ledger_schema",
            ENV_LEDGER_SCHEMA,
            self.ledger_schema == defaults.ledger_schema,
            defaults.ledger_schema.clone(),
        );
        record(
            "ledger_table",
            ENV_LEDGER_TABLE,
            self.ledger_table == defaults.ledger_table,
            defaults.ledger_table.clone(),
        );
        record(
            "command_timeout_secs",
            ENV_COMMAND_TIMEOUT,
            self.command_timeout_secs == defaults.command_timeout_secs,
            defaults.command_timeout_secs.to_string(),
        );
        record(
            "lock_enabled",
            ENV_LOCK_ENABLED,
            self.lock_enabled == defaults.lock_enabled,
            defaults.lock_enabled.to_string(),
        );
        record(
            "lock_timeout_ms",
            ENV_LOCK_TIMEOUT,
            self.lock_timeout_ms == defaults.lock_timeout_ms,
            defaults.lock_timeout_ms.to_string(),
        );
        record(
            "lock_namespace",
            ENV_LOCK_NAMESPACE,
            self.lock_namespace == defaults.lock_namespace,
            defaults.lock_namespace.clone(),
        );
        record(
            "restore_from",
            ENV_RESTORE_FROM,
            self.restore_from.is_none(),
            "none".to_string(),
        );
        record(
            "maintenance_database",
            ENV_MAINTENANCE_DB,
            self.maintenance_database == defaults.maintenance_database,
            defaults.maintenance_database.clone(),
        );

        sources
    }

    /// Mark every field as coming from the given file unless an env var overrides it
    pub fn sources_with_file(&self, path: &Path) -> HashMap<String, ConfigSource> {
        self.config_sources()
            .into_iter()
            .map(|(field, source)| match source {
                ConfigSource::Programmatic => (field, ConfigSource::File(path.display().to_string())),
                other => (field, other),
            })
            .collect()
    }
}
