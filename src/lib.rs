//! # Dimload - Slowly changing dimension maintenance and lookup
//!
//! Dimload feeds CSV change streams into a versioned dimension table:
//! each natural key carries a timeline of version rows with contiguous
//! half-open validity windows, and every input row resolves to the
//! surrogate key of the version active at its event date.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   CSV File  │────▶│   Parser    │────▶│   Engine    │────▶│  Dimension  │
//! │  (auto-enc) │     │ (typed rows)│     │(lookup+SCD) │     │   table     │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dimload::{run_job, CsvRowSource, DimensionConfig, RunOptions, SqliteDatabase};
//!
//! let config = DimensionConfig::from_file("customer_dim.json")?;
//! let mut source = CsvRowSource::open("changes.csv", &|f| config.field_type(f))?;
//! let report = run_job(
//!     &config,
//!     &mut source,
//!     |_| SqliteDatabase::open("warehouse.db"),
//!     &RunOptions::default(),
//! )?;
//! println!("{} rows, {} inserts", report.stats.rows_read, report.stats.inserts);
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`row`] - Typed values, rows and schemas
//! - [`config`] - Dimension job configuration
//! - [`parser`] - CSV parsing with auto-detection
//! - [`validation`] - Config validation and table pre-flight
//! - [`db`] - Database boundary and the SQLite backend
//! - [`engine`] - Lookup, change detection and the write path
//! - [`run`] - Run orchestration and worker partitioning

// Core modules
pub mod error;
pub mod row;

// Configuration
pub mod config;

// Parsing
pub mod parser;

// Validation
pub mod validation;

// Database
pub mod db;

// Engine
pub mod engine;

// Orchestration
pub mod run;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{ConfigError, CsvError, DbError, RunError};

// =============================================================================
// Re-exports - Rows & Schema
// =============================================================================

pub use row::{Field, Row, RowSink, RowStream, Schema, Value, ValueType, DATE_FORMAT};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{
    example_config, DimensionConfig, KeyMapping, KeySource, Mode, ReturnField, TrackedField,
    UpdatePolicy,
};

// =============================================================================
// Re-exports - CSV Parsing
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_encoding, parse_bytes_auto, parse_file_auto,
    CsvRowSource, ParseResult,
};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{preflight, validate_config};

// =============================================================================
// Re-exports - Database
// =============================================================================

pub use db::{Capabilities, Database, SqliteDatabase};

// =============================================================================
// Re-exports - Engine
// =============================================================================

pub use engine::{
    decide, Decision, DimensionRow, KeyGenerator, LookupResolver, RunStats, VersionAction, Worker,
};

// =============================================================================
// Re-exports - Run
// =============================================================================

pub use run::{run_job, RunOptions, RunReport};
