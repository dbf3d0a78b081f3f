//! Error types for the migration system
//!
//! Every failure a run can hit falls into one closed category: configuration,
//! source loading, offline validation, ledger consistency, locking,
//! provisioning or execution. Callers can match on the category to decide
//! whether retrying the whole run makes sense.

use thiserror::Error;

/// Boxed error returned by migration bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Top-level error for a migration run
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Migration {version} '{name}' failed: {source}")]
    Execution {
        version: i64,
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration run was cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Whether the failure happened before anything was written to the target database
    pub fn is_before_mutation(&self) -> bool {
        matches!(
            self,
            MigrateError::Config(_)
                | MigrateError::Source(_)
                | MigrateError::Validation(_)
                | MigrateError::Consistency(_)
                | MigrateError::Lock(_)
        )
    }
}

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Errors reported by a migration source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Soft condition: the source has nothing to offer
    #[error("No migrations found in {source_name}")]
    NoMigrationsFound { source_name: String },

    #[error("Invalid migration file name '{file_name}': {reason}")]
    InvalidFileName { file_name: String, reason: String },

    #[error("Failed to read migrations from {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    /// Whether the runner may log this and carry on
    pub fn is_soft(&self) -> bool {
        matches!(self, SourceError::NoMigrationsFound { .. })
    }
}

/// Integrity problems in the migration set itself, detected without a database
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No migrations were loaded")]
    Empty,

    #[error("Migration version must be positive: {version} '{name}'")]
    NonPositiveVersion { version: i64, name: String },

    #[error("Duplicate migration versions: {}", .entries.join(", "))]
    Duplicates { entries: Vec<String> },

    #[error(
        "Migrations are not sequential within family {family}: {previous} '{previous_name}' is followed by {next} '{next_name}'"
    )]
    NotSequential {
        family: i64,
        previous: i64,
        previous_name: String,
        next: i64,
        next_name: String,
    },

    #[error("Snapshot {version} '{name}' is above the highest regular migration version {max_version}")]
    SnapshotTooHigh {
        version: i64,
        name: String,
        max_version: i64,
    },
}

/// Mismatches between the ledger and the known migration set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error(
        "Database is ahead of the code: applied version {applied_version} is newer than the latest known migration {known_version}"
    )]
    DatabaseAhead {
        applied_version: i64,
        known_version: i64,
    },

    #[error("Applied migration {version} '{name}' (snapshot: {is_snapshot}) is not known to this codebase")]
    UnknownApplied {
        version: i64,
        name: String,
        is_snapshot: bool,
    },

    #[error(
        "Migration {version} was applied as '{applied_name}' but is now named '{known_name}'; the database was migrated from a different history"
    )]
    NameMismatch {
        version: i64,
        applied_name: String,
        known_name: String,
    },
}

/// Decoded reason for a failed lock acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockFailureReason {
    Timeout,
    Canceled,
    DeadlockVictim,
    ParameterError,
    Unknown(String),
}

impl LockFailureReason {
    /// Decode a PostgreSQL SQLSTATE raised by the lock call
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "55P03" => LockFailureReason::Timeout,
            "57014" => LockFailureReason::Canceled,
            "40P01" => LockFailureReason::DeadlockVictim,
            "22023" | "22P02" | "42883" => LockFailureReason::ParameterError,
            other => LockFailureReason::Unknown(other.to_string()),
        }
    }

    /// Numeric result code of the reason; `None` for unknown reasons
    pub fn code(&self) -> Option<i32> {
        match self {
            LockFailureReason::Timeout => Some(-1),
            LockFailureReason::Canceled => Some(-2),
            LockFailureReason::DeadlockVictim => Some(-3),
            LockFailureReason::ParameterError => Some(-999),
            LockFailureReason::Unknown(_) => None,
        }
    }
}

impl std::fmt::Display for LockFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockFailureReason::Timeout => write!(f, "timeout"),
            LockFailureReason::Canceled => write!(f, "canceled"),
            LockFailureReason::DeadlockVictim => write!(f, "chosen as deadlock victim"),
            LockFailureReason::ParameterError => write!(f, "parameter/validation error"),
            LockFailureReason::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

/// Failure to acquire the migration lock
#[derive(Debug, Error)]
#[error(
    "Failed to acquire migration lock '{resource}' on database '{database}' within {timeout_ms}ms: {reason}"
)]
pub struct LockError {
    pub database: String,
    pub resource: String,
    pub timeout_ms: u64,
    pub reason: LockFailureReason,
    #[source]
    pub source: Option<sqlx::Error>,
}

/// Failures while making sure the target database exists
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Restore source database '{source_database}' does not exist")]
    SourceMissing { source_database: String },

    #[error("Restore source database '{source_database}' is in use; close its other sessions and retry")]
    SourceInUse {
        source_database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to connect to maintenance database '{database}': {source}")]
    Connect {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to {operation} database '{database}': {source}")]
    Operation {
        operation: &'static str,
        database: String,
        #[source]
        source: sqlx::Error,
    },
}
