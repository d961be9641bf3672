//! Error types for the dimload engine.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`CsvError`] - input parsing errors
//! - [`ConfigError`] - job configuration errors (fatal before any row)
//! - [`DbError`] - database collaborator errors
//! - [`RunError`] - top-level run errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// CSV Input Errors
// =============================================================================

/// Errors while reading the input row stream.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Failed to read the input file.
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),

    /// Input is empty or has no header line.
    #[error("Input has no header line")]
    NoHeaders,

    /// A cell could not be coerced to the declared field type.
    #[error("Line {line}, column '{column}': cannot read '{value}' as {expected}")]
    BadCell {
        line: usize,
        column: String,
        value: String,
        expected: &'static str,
    },
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors in the dimension job configuration.
///
/// All of these are fatal at initialization time; no row is ever
/// processed or written once one is raised.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for the expected shape.
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required setting is absent or empty.
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// A configured table or column name is not a safe SQL identifier.
    #[error("Invalid identifier '{0}': only letters, digits and '_' are allowed")]
    InvalidIdentifier(String),

    /// A natural-key stream field does not exist in the input schema.
    #[error("Key field '{0}' not found in the input row schema")]
    KeyFieldNotFound(String),

    /// A tracked stream field does not exist in the input schema.
    #[error("Stream field '{0}' not found in the input row schema")]
    StreamFieldNotFound(String),

    /// The configured event-date field does not exist in the input schema.
    #[error("Event date field '{0}' not found in the input row schema")]
    DateFieldNotFound(String),

    /// A tracked-column policy needs a stream field but none was given.
    #[error("Column '{column}' with policy '{policy}' requires a stream field")]
    StreamFieldRequired { column: String, policy: String },

    /// A configured column is absent from the dimension table.
    #[error("Column '{column}' not present in dimension table '{table}'")]
    ColumnMissing { table: String, column: String },

    /// Sentinel year range is inverted or out of bounds.
    #[error("Invalid sentinel year range: min_year {0} .. max_year {1}")]
    YearRange(i32, i32),

    /// The command requires the other run mode.
    #[error("Config is in {actual} mode but this command requires {required} mode")]
    WrongMode {
        actual: &'static str,
        required: &'static str,
    },
}

// =============================================================================
// Database Errors
// =============================================================================

/// Errors from the database collaborator.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQL error.
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Could not open the database.
    #[error("Cannot open database '{path}': {source}")]
    Connect {
        path: String,
        source: rusqlite::Error,
    },

    /// An insert expected a generated key but none came back.
    #[error("No generated key returned for insert into '{0}'")]
    NoGeneratedKey(String),

    /// The backend has no native sequence support.
    #[error("Sequences are not supported by this database (requested '{0}')")]
    SequenceUnsupported(String),

    /// A looked-up value had an unusable storage type.
    #[error("Unsupported value in column {column}: {message}")]
    BadValue { column: usize, message: String },
}

// =============================================================================
// Run Errors (top-level)
// =============================================================================

/// Top-level errors for a dimension run.
///
/// This is the main error type returned by [`crate::run::run_job`].
/// Database errors during row processing are never retried: the run
/// terminates with the row and natural key that triggered the failure,
/// because partially applied version logic would corrupt the timeline.
#[derive(Debug, Error)]
pub enum RunError {
    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Input stream error.
    #[error("Input error: {0}")]
    Csv(#[from] CsvError),

    /// Database error outside of row processing (connect, pre-flight, commit).
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// Database error while processing one row.
    #[error("Row {row} (key {key}): {source}")]
    RowDb {
        row: usize,
        key: String,
        source: DbError,
    },

    /// The configured event-date field held a null value.
    #[error("Row {row}: event date field '{field}' is null")]
    NullEventDate { row: usize, field: String },

    /// The configured event-date field held a non-date value.
    #[error("Row {row}: event date field '{field}' is not a date (got '{value}')")]
    BadEventDate {
        row: usize,
        field: String,
        value: String,
    },

    /// A worker thread ended without reporting back.
    #[error("Worker {0} panicked")]
    WorkerPanic(usize),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for input parsing.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Result type for run operations.
pub type RunResult<T> = Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // ConfigError -> RunError
        let cfg_err = ConfigError::KeyFieldNotFound("customer_id".into());
        let run_err: RunError = cfg_err.into();
        assert!(run_err.to_string().contains("customer_id"));

        // DbError -> RunError
        let db_err = DbError::NoGeneratedKey("dim_customer".into());
        let run_err: RunError = db_err.into();
        assert!(run_err.to_string().contains("dim_customer"));
    }

    #[test]
    fn test_row_error_names_the_key() {
        let err = RunError::RowDb {
            row: 17,
            key: "42".into(),
            source: DbError::NoGeneratedKey("dim_customer".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("Row 17"));
        assert!(msg.contains("42"));
    }
}
