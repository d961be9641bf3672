//! Configuration validation and database pre-flight checks.
//!
//! Everything here is fatal before the first row: a job either passes
//! completely or never touches the dimension table.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{DimensionConfig, Mode};
use crate::db::Database;
use crate::error::{ConfigError, ConfigResult};

/// Safe SQL identifier: table and column names are interpolated into
/// statements, so they must match this shape.
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"));

fn check_identifier(name: &str) -> ConfigResult<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier(name.to_string()))
    }
}

/// Validate the static shape of a job configuration.
///
/// Schema-dependent checks (do the stream fields exist in the input?)
/// happen later, once the input header is known; database-dependent
/// checks live in [`preflight`].
pub fn validate_config(config: &DimensionConfig) -> ConfigResult<()> {
    if config.table.is_empty() {
        return Err(ConfigError::Missing("table"));
    }
    if config.keys.is_empty() {
        return Err(ConfigError::Missing("keys"));
    }
    if config.key_column.is_empty() {
        return Err(ConfigError::Missing("key_column"));
    }
    if config.version_column.is_empty() {
        return Err(ConfigError::Missing("version_column"));
    }

    check_identifier(&config.table)?;
    check_identifier(&config.key_column)?;
    check_identifier(&config.version_column)?;
    check_identifier(&config.date_from_column)?;
    check_identifier(&config.date_to_column)?;
    for key in &config.keys {
        if key.stream.is_empty() {
            return Err(ConfigError::Missing("keys[].stream"));
        }
        check_identifier(&key.column)?;
    }

    match &config.mode {
        Mode::Maintenance { fields } => {
            for field in fields {
                check_identifier(&field.column)?;
                if field.policy.takes_stream_value()
                    && field.stream.as_deref().unwrap_or("").is_empty()
                {
                    return Err(ConfigError::StreamFieldRequired {
                        column: field.column.clone(),
                        policy: field.policy.name().to_string(),
                    });
                }
            }
        }
        Mode::Lookup { returns } => {
            for ret in returns {
                check_identifier(&ret.column)?;
            }
        }
    }

    if config.min_year >= config.max_year {
        return Err(ConfigError::YearRange(config.min_year, config.max_year));
    }
    // The sentinel years must materialize as real dates.
    if config.min_date() > config.max_date() {
        return Err(ConfigError::YearRange(config.min_year, config.max_year));
    }

    Ok(())
}

/// Check that every configured column exists on the dimension table.
pub fn preflight(config: &DimensionConfig, db: &mut dyn Database) -> ConfigResult<()> {
    let columns = db
        .table_columns(&config.table)
        .map_err(|_| ConfigError::ColumnMissing {
            table: config.table.clone(),
            column: config.key_column.clone(),
        })?;
    if columns.is_empty() {
        return Err(ConfigError::ColumnMissing {
            table: config.table.clone(),
            column: config.key_column.clone(),
        });
    }

    let require = |column: &str| -> ConfigResult<()> {
        if columns.iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(ConfigError::ColumnMissing {
                table: config.table.clone(),
                column: column.to_string(),
            })
        }
    };

    require(&config.key_column)?;
    require(&config.version_column)?;
    require(&config.date_from_column)?;
    require(&config.date_to_column)?;
    for key in &config.keys {
        require(&key.column)?;
    }
    match &config.mode {
        Mode::Maintenance { fields } => {
            for field in fields {
                require(&field.column)?;
            }
        }
        Mode::Lookup { returns } => {
            for ret in returns {
                require(&ret.column)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{example_config, TrackedField, UpdatePolicy};
    use crate::db::SqliteDatabase;

    #[test]
    fn test_example_config_is_valid() {
        assert!(validate_config(&example_config()).is_ok());
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let mut config = example_config();
        config.table = "dim_customer; DROP TABLE x".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_rejects_missing_keys() {
        let mut config = example_config();
        config.keys.clear();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Missing("keys"))
        ));
    }

    #[test]
    fn test_comparing_policy_needs_stream_field() {
        let mut config = example_config();
        if let Mode::Maintenance { fields } = &mut config.mode {
            fields.push(TrackedField {
                stream: None,
                column: "tier".to_string(),
                policy: UpdatePolicy::Insert,
            });
        }
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::StreamFieldRequired { .. })
        ));
    }

    #[test]
    fn test_audit_policy_takes_no_stream_field() {
        let mut config = example_config();
        if let Mode::Maintenance { fields } = &mut config.mode {
            fields.push(TrackedField {
                stream: None,
                column: "date_updated".to_string(),
                policy: UpdatePolicy::DateUpdated,
            });
        }
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_inverted_year_range() {
        let mut config = example_config();
        config.min_year = 2200;
        config.max_year = 1900;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::YearRange(2200, 1900))
        ));
    }

    #[test]
    fn test_preflight_reports_missing_column() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.connection()
            .execute_batch(
                "CREATE TABLE dim_customer (
                    customer_tk INTEGER PRIMARY KEY,
                    version INTEGER,
                    customer_id INTEGER,
                    email TEXT,
                    valid_from TEXT,
                    valid_to TEXT
                )",
            )
            .unwrap();

        // tier is tracked but absent from the table
        let config = example_config();
        let err = preflight(&config, &mut db).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ColumnMissing { ref column, .. } if column == "tier"
        ));
    }

    #[test]
    fn test_preflight_passes_on_complete_table() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.connection()
            .execute_batch(
                "CREATE TABLE dim_customer (
                    customer_tk INTEGER PRIMARY KEY,
                    version INTEGER,
                    customer_id INTEGER,
                    email TEXT,
                    tier TEXT,
                    valid_from TEXT,
                    valid_to TEXT
                )",
            )
            .unwrap();
        assert!(preflight(&example_config(), &mut db).is_ok());
    }
}
