use anyhow::{bail, Context};
use elif_migrations::{
    format_file_name, version_family, DirectorySource, Migration, MigrationSource, FAMILY_SIZE,
    MAX_FILE_VERSION,
};
use std::path::Path;

/// Create an empty migration file with the next free version
pub async fn create(dir: &Path, name: &str, family: Option<i64>, snapshot: bool) -> anyhow::Result<()> {
    if name.trim().is_empty() {
        bail!("Migration name must not be empty");
    }

    let existing = match DirectorySource::new(dir).load_migrations().await {
        Ok(migrations) => migrations,
        Err(e) if e.is_soft() => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    let version = next_version(&existing, family, snapshot)?;
    let file_name = format_file_name(version, name, snapshot)?;
    let path = dir.join(&file_name);

    if path.exists() {
        bail!("{} already exists", path.display());
    }

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let template = format!(
        "-- {}{}\n-- Separate batches with a line containing only GO\n\n",
        name.trim(),
        if snapshot { " (snapshot)" } else { "" }
    );
    tokio::fs::write(&path, template)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created migration: {}", path.display());
    Ok(())
}

/// Version for a new migration.
///
/// Regular migrations continue their family (default: the family of the
/// newest regular migration). Snapshots cover everything up to the newest
/// regular migration.
pub fn next_version(existing: &[Migration], family: Option<i64>, snapshot: bool) -> anyhow::Result<i64> {
    let newest = existing
        .iter()
        .filter(|m| !m.is_snapshot())
        .map(|m| m.version())
        .max();

    if snapshot {
        return match newest {
            Some(version) => Ok(version),
            None => bail!("A snapshot needs at least one regular migration to cover"),
        };
    }

    let family = family.unwrap_or_else(|| newest.map_or(0, version_family));
    if family < 0 {
        bail!("Family must not be negative");
    }

    let in_family = existing
        .iter()
        .filter(|m| !m.is_snapshot() && m.family() == family)
        .map(|m| m.version())
        .max();

    let version = match in_family {
        Some(version) => version.checked_add(1),
        None if family == 0 => Some(1),
        None => family.checked_mul(FAMILY_SIZE),
    };

    match version {
        Some(version) if version > MAX_FILE_VERSION => {
            bail!("Version {} does not fit in a migration file name (max {})", version, MAX_FILE_VERSION)
        }
        Some(version) if version_family(version) == family => Ok(version),
        Some(_) => bail!("Family {} is full", family),
        None => bail!("Family {} is out of range", family),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn regular(versions: &[i64]) -> Vec<Migration> {
        versions
            .iter()
            .map(|&v| Migration::sql(v, format!("m{}", v), ""))
            .collect()
    }

    #[test]
    fn test_next_version_continues_newest_family() {
        assert_eq!(next_version(&[], None, false).unwrap(), 1);
        assert_eq!(next_version(&regular(&[1, 2]), None, false).unwrap(), 3);
        assert_eq!(next_version(&regular(&[1, 2, 1000]), None, false).unwrap(), 1001);
    }

    #[test]
    fn test_next_version_in_explicit_family() {
        let existing = regular(&[1, 2, 1000]);
        assert_eq!(next_version(&existing, Some(0), false).unwrap(), 3);
        assert_eq!(next_version(&existing, Some(5), false).unwrap(), 5000);
        assert!(next_version(&regular(&[999]), Some(0), false).is_err());
    }

    #[test]
    fn test_next_version_rejects_families_beyond_file_name_range() {
        let largest_family = version_family(MAX_FILE_VERSION);
        assert_eq!(
            next_version(&[], Some(largest_family), false).unwrap(),
            largest_family * FAMILY_SIZE
        );

        let err = next_version(&[], Some(largest_family + 1), false).unwrap_err();
        assert!(err.to_string().contains("does not fit"), "{}", err);

        // Would overflow i64 when multiplied out
        let err = next_version(&[], Some(i64::MAX / 10), false).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{}", err);
        assert!(next_version(&[], Some(i64::MAX), false).is_err());
    }

    #[test]
    fn test_next_version_stops_at_last_file_name_version() {
        let existing = regular(&[MAX_FILE_VERSION]);
        assert!(next_version(&existing, None, false).is_err());
    }

    #[test]
    fn test_snapshot_takes_newest_regular_version() {
        assert_eq!(next_version(&regular(&[1, 2, 1000]), None, true).unwrap(), 1000);
        assert!(next_version(&[], None, true).is_err());
    }

    #[tokio::test]
    async fn test_create_writes_parseable_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("migrations");

        create(&dir, "Add users", None, false).await.unwrap();
        create(&dir, "Add orders", None, false).await.unwrap();

        let migrations = DirectorySource::new(&dir).load_migrations().await.unwrap();
        let versions: Vec<i64> = migrations.iter().map(|m| m.version()).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(migrations[1].name(), "add orders");
    }
}
