//! Migration set validation
//!
//! Offline checks look at the migration set alone; online checks compare it
//! with the rows already in the ledger. Both are pure: they log at error level
//! and return the first problem found, without touching the database.

use std::collections::HashMap;

use crate::error::{ConsistencyError, ValidationError};
use crate::ledger::AppliedMigration;
use crate::migration::Migration;

/// Check the integrity of the combined migration set
pub fn validate_offline(migrations: &[Migration]) -> Result<(), ValidationError> {
    check_offline(migrations).inspect_err(|e| tracing::error!("Migration set is invalid: {}", e))
}

fn check_offline(migrations: &[Migration]) -> Result<(), ValidationError> {
    if migrations.is_empty() {
        return Err(ValidationError::Empty);
    }

    if let Some(m) = migrations.iter().find(|m| m.version() <= 0) {
        return Err(ValidationError::NonPositiveVersion {
            version: m.version(),
            name: m.name().to_string(),
        });
    }

    check_duplicates(migrations)?;

    let mut regular: Vec<&Migration> = migrations.iter().filter(|m| !m.is_snapshot()).collect();
    regular.sort_by_key(|m| m.version());

    for pair in regular.windows(2) {
        let (previous, next) = (pair[0], pair[1]);
        if previous.family() == next.family() && next.version() - previous.version() != 1 {
            return Err(ValidationError::NotSequential {
                family: previous.family(),
                previous: previous.version(),
                previous_name: previous.name().to_string(),
                next: next.version(),
                next_name: next.name().to_string(),
            });
        }
    }

    // A set made only of snapshots has no regular ceiling to compare against
    if let Some(max_version) = regular.last().map(|m| m.version()) {
        if let Some(snapshot) = migrations
            .iter()
            .filter(|m| m.is_snapshot())
            .find(|m| m.version() > max_version)
        {
            return Err(ValidationError::SnapshotTooHigh {
                version: snapshot.version(),
                name: snapshot.name().to_string(),
                max_version,
            });
        }
    }

    Ok(())
}

fn check_duplicates(migrations: &[Migration]) -> Result<(), ValidationError> {
    let mut by_key: HashMap<(i64, bool), Vec<&Migration>> = HashMap::new();
    for migration in migrations {
        by_key
            .entry((migration.version(), migration.is_snapshot()))
            .or_default()
            .push(migration);
    }

    let mut conflicts: Vec<&Migration> = by_key
        .into_values()
        .filter(|group| group.len() > 1)
        .flatten()
        .collect();

    if conflicts.is_empty() {
        return Ok(());
    }

    conflicts.sort_by(|a, b| (a.version(), a.is_snapshot()).cmp(&(b.version(), b.is_snapshot())));
    Err(ValidationError::Duplicates {
        entries: conflicts.iter().map(|m| m.label()).collect(),
    })
}

/// Check that the ledger agrees with the known migration set
pub fn validate_online(
    applied: &[AppliedMigration],
    migrations: &[Migration],
) -> Result<(), ConsistencyError> {
    check_online(applied, migrations)
        .inspect_err(|e| tracing::error!("Database does not match the migration set: {}", e))
}

fn check_online(applied: &[AppliedMigration], migrations: &[Migration]) -> Result<(), ConsistencyError> {
    let known_version = migrations.iter().map(|m| m.version()).max().unwrap_or(0);
    if let Some(applied_version) = applied.iter().map(|row| row.version).max() {
        if applied_version > known_version {
            return Err(ConsistencyError::DatabaseAhead {
                applied_version,
                known_version,
            });
        }
    }

    let known: HashMap<(i64, bool), &Migration> = migrations
        .iter()
        .map(|m| ((m.version(), m.is_snapshot()), m))
        .collect();

    for row in applied {
        match known.get(&(row.version, row.is_snapshot)) {
            None => {
                return Err(ConsistencyError::UnknownApplied {
                    version: row.version,
                    name: row.name.clone(),
                    is_snapshot: row.is_snapshot,
                })
            }
            Some(migration) if migration.name() != row.name => {
                return Err(ConsistencyError::NameMismatch {
                    version: row.version,
                    applied_name: row.name.clone(),
                    known_name: migration.name().to_string(),
                })
            }
            Some(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
