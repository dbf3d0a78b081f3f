//! Migration file name parsing
//!
//! File names carry a twelve-digit version as four groups of three digits,
//! followed by the display name:
//!
//! ```text
//! 000_001_000_002_add_user_email.sql      -> version 1000002, "add user email"
//! 000.000.000.500_baseline.snapshot.sql   -> version 500, snapshot "baseline"
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SourceError;

static FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{3})[._](\d{3})[._](\d{3})[._](\d{3})[_-](.+?)(\.snapshot)?\.sql$")
        .expect("migration file name pattern is valid")
});

/// Version, name and snapshot flag encoded in a file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFileName {
    pub version: i64,
    pub name: String,
    pub is_snapshot: bool,
}

/// Whether a file should be considered a migration at all
pub fn is_sql_file(file_name: &str) -> bool {
    file_name.to_lowercase().ends_with(".sql")
}

/// Parse a migration file name
pub fn parse_file_name(file_name: &str) -> Result<ParsedFileName, SourceError> {
    let invalid = |reason: &str| SourceError::InvalidFileName {
        file_name: file_name.to_string(),
        reason: reason.to_string(),
    };

    let captures = FILE_NAME
        .captures(file_name)
        .ok_or_else(|| invalid("expected VVV_VVV_VVV_VVV_name.sql"))?;

    let digits: String = (1..=4).map(|group| &captures[group]).collect();
    let version: i64 = digits
        .parse()
        .map_err(|_| invalid("version is not a number"))?;

    let name = captures[5].replace('_', " ").trim().to_string();
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }

    Ok(ParsedFileName {
        version,
        name,
        is_snapshot: captures.get(6).is_some(),
    })
}

/// Largest version a file name can carry (twelve digits)
pub const MAX_FILE_VERSION: i64 = 999_999_999_999;

/// File name for a migration, the inverse of [`parse_file_name`]
pub fn format_file_name(version: i64, name: &str, is_snapshot: bool) -> Result<String, SourceError> {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let file_name = format!("{}{}.sql", slug, if is_snapshot { ".snapshot" } else { "" });

    if !(1..=MAX_FILE_VERSION).contains(&version) {
        return Err(SourceError::InvalidFileName {
            file_name,
            reason: format!("version {} does not fit in 1..={}", version, MAX_FILE_VERSION),
        });
    }
    if slug.is_empty() {
        return Err(SourceError::InvalidFileName {
            file_name,
            reason: "name is empty".to_string(),
        });
    }

    let digits = format!("{:012}", version);
    Ok(format!(
        "{}_{}_{}_{}_{}",
        &digits[0..3],
        &digits[3..6],
        &digits[6..9],
        &digits[9..12],
        file_name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_regular_file_name() {
        let parsed = parse_file_name("000_001_000_002_add_user_email.sql").unwrap();
        assert_eq!(
            parsed,
            ParsedFileName {
                version: 1_000_002,
                name: "add user email".to_string(),
                is_snapshot: false,
            }
        );
    }

    #[test]
    fn test_parse_dotted_snapshot_file_name() {
        let parsed = parse_file_name("000.000.000.500_baseline.snapshot.sql").unwrap();
        assert_eq!(parsed.version, 500);
        assert_eq!(parsed.name, "baseline");
        assert!(parsed.is_snapshot);
    }

    #[test]
    fn test_parse_upper_case_extension() {
        let parsed = parse_file_name("000_000_000_001-Init.SQL").unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.name, "Init");
    }

    #[test]
    fn test_rejects_malformed_names() {
        for name in [
            "001_add_users.sql",
            "000_000_001_add_users.sql",
            "0000_000_000_001_add_users.sql",
            "000_000_000_001_.sql",
            "000_000_000_001_add_users.txt",
        ] {
            assert!(parse_file_name(name).is_err(), "{} should be rejected", name);
        }
    }

    #[test]
    fn test_format_file_name() {
        assert_eq!(
            format_file_name(1_000_002, "Add user email", false).unwrap(),
            "000_001_000_002_add_user_email.sql"
        );
        assert_eq!(
            format_file_name(500, "baseline", true).unwrap(),
            "000_000_000_500_baseline.snapshot.sql"
        );

        let parsed = parse_file_name(&format_file_name(42, "Orders: index", false).unwrap()).unwrap();
        assert_eq!(parsed.version, 42);
        assert_eq!(parsed.name, "orders  index");
    }

    #[test]
    fn test_format_file_name_keeps_largest_version() {
        let file_name = format_file_name(MAX_FILE_VERSION, "last", false).unwrap();
        assert_eq!(file_name, "999_999_999_999_last.sql");
        assert_eq!(parse_file_name(&file_name).unwrap().version, MAX_FILE_VERSION);
    }

    #[test]
    fn test_format_file_name_rejects_versions_that_do_not_fit() {
        for version in [0, -1, MAX_FILE_VERSION + 1, 1_000_000_000_000, i64::MAX] {
            let err = format_file_name(version, "x", false).unwrap_err();
            assert!(
                matches!(err, SourceError::InvalidFileName { .. }),
                "{} should be rejected",
                version
            );
        }
        assert!(format_file_name(1, "   ", false).is_err());
    }

    #[test]
    fn test_is_sql_file() {
        assert!(is_sql_file("000_000_000_001_init.sql"));
        assert!(is_sql_file("README.SQL"));
        assert!(!is_sql_file("README.md"));
    }
}
