//! Dimension job configuration.
//!
//! A job file describes one dimension table and how incoming stream
//! fields map onto it: the natural-key pairs, the tracked columns with
//! their update policies (maintenance mode) or the columns to retrieve
//! (lookup mode), the surrogate-key source, and the run settings such as
//! commit size and the sentinel year range.
//!
//! # Example
//!
//! ```rust,ignore
//! use dimload::config::DimensionConfig;
//!
//! let config = DimensionConfig::from_file("customer_dim.json")?;
//! assert!(config.is_maintenance());
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::ConfigResult;
use crate::row::ValueType;

// =============================================================================
// Update Policies
// =============================================================================

/// Per-column maintenance policy, a static classification from
/// configuration (never per-row state).
///
/// The first three compare an incoming stream value against the stored
/// one; the rest are audit columns written by the engine itself and never
/// compared or read from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// A change creates a new version row (SCD Type 2).
    Insert,
    /// A change overwrites the current row in place (SCD Type 1).
    Update,
    /// A change is written through every historical version.
    Punchthrough,
    /// Timestamp set when the row was inserted.
    DateInserted,
    /// Timestamp set when the row was last updated.
    DateUpdated,
    /// Timestamp set on both insert and update.
    DateInsertedOrUpdated,
    /// Boolean flag marking the current version row.
    LastVersion,
}

impl UpdatePolicy {
    /// Whether this policy consumes a value from the input stream.
    pub fn takes_stream_value(&self) -> bool {
        matches!(
            self,
            UpdatePolicy::Insert | UpdatePolicy::Update | UpdatePolicy::Punchthrough
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            UpdatePolicy::Insert => "insert",
            UpdatePolicy::Update => "update",
            UpdatePolicy::Punchthrough => "punchthrough",
            UpdatePolicy::DateInserted => "date_inserted",
            UpdatePolicy::DateUpdated => "date_updated",
            UpdatePolicy::DateInsertedOrUpdated => "date_inserted_or_updated",
            UpdatePolicy::LastVersion => "last_version",
        }
    }
}

// =============================================================================
// Mappings
// =============================================================================

/// One natural-key pair: stream field name → dimension column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMapping {
    pub stream: String,
    pub column: String,
}

/// One tracked column in maintenance mode.
///
/// `stream` is required for comparing policies (insert / update /
/// punchthrough) and must be absent for audit policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedField {
    #[serde(default)]
    pub stream: Option<String>,
    pub column: String,
    pub policy: UpdatePolicy,
}

/// One retrieved column in lookup mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnField {
    pub column: String,
    /// Output field name; defaults to the column name.
    #[serde(default)]
    pub rename: Option<String>,
    #[serde(default)]
    pub value_type: ValueType,
}

impl ReturnField {
    pub fn output_name(&self) -> &str {
        self.rename.as_deref().unwrap_or(&self.column)
    }
}

/// Run mode: maintain the dimension, or only resolve keys against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Mode {
    Maintenance { fields: Vec<TrackedField> },
    Lookup { returns: Vec<ReturnField> },
}

/// Surrogate-key generation strategy requested by configuration.
///
/// The effective strategy also depends on the database capabilities; see
/// the key generator selection in the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeySource {
    /// Shared counter table keyed by dimension table name.
    #[default]
    CounterTable,
    /// Native identity column; the database assigns the key on insert.
    AutoIncrement,
    /// Native database sequence object.
    Sequence { name: String },
}

// =============================================================================
// Dimension Config
// =============================================================================

/// Complete configuration of one dimension job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionConfig {
    /// Dimension table name.
    pub table: String,

    /// Ordered natural-key pairs (stream field → key column).
    pub keys: Vec<KeyMapping>,

    /// Stream field carrying the event date; system clock when absent.
    #[serde(default)]
    pub date_field: Option<String>,

    /// Validity range columns on the dimension table.
    #[serde(default = "default_date_from")]
    pub date_from_column: String,
    #[serde(default = "default_date_to")]
    pub date_to_column: String,

    /// Surrogate-key column, and its optional name on the output row.
    pub key_column: String,
    #[serde(default)]
    pub key_rename: Option<String>,

    /// Version counter column.
    pub version_column: String,

    /// Surrogate key returned for unmatched lookups.
    #[serde(default)]
    pub not_found_key: i64,

    /// Rows between commits.
    #[serde(default = "default_commit_size")]
    pub commit_size: usize,

    /// Years materializing the MIN_DATE / MAX_DATE sentinels.
    #[serde(default = "default_min_year")]
    pub min_year: i32,
    #[serde(default = "default_max_year")]
    pub max_year: i32,

    /// Surrogate-key source.
    #[serde(default)]
    pub key_source: KeySource,

    /// Positive-hit lookup cache capacity; negative disables the cache.
    #[serde(default = "default_cache_size")]
    pub cache_size: i64,

    /// Declared types for stream fields (everything else is text).
    #[serde(default)]
    pub field_types: HashMap<String, ValueType>,

    /// Maintenance or lookup mode.
    #[serde(flatten)]
    pub mode: Mode,
}

fn default_date_from() -> String {
    "valid_from".to_string()
}

fn default_date_to() -> String {
    "valid_to".to_string()
}

fn default_commit_size() -> usize {
    100
}

fn default_min_year() -> i32 {
    1900
}

fn default_max_year() -> i32 {
    2199
}

fn default_cache_size() -> i64 {
    5000
}

impl DimensionConfig {
    /// Parse a config from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a config from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_maintenance(&self) -> bool {
        matches!(self.mode, Mode::Maintenance { .. })
    }

    /// Tracked fields in maintenance mode, empty slice otherwise.
    pub fn tracked_fields(&self) -> &[TrackedField] {
        match &self.mode {
            Mode::Maintenance { fields } => fields,
            Mode::Lookup { .. } => &[],
        }
    }

    /// Return fields in lookup mode, empty slice otherwise.
    pub fn return_fields(&self) -> &[ReturnField] {
        match &self.mode {
            Mode::Lookup { returns } => returns,
            Mode::Maintenance { .. } => &[],
        }
    }

    /// The MIN_DATE sentinel (`]-oo` end of the timeline).
    pub fn min_date(&self) -> NaiveDateTime {
        sentinel_date(self.min_year, 1, 1, 0, 0, 0)
    }

    /// The MAX_DATE sentinel (`+oo[` end of the timeline).
    pub fn max_date(&self) -> NaiveDateTime {
        sentinel_date(self.max_year, 12, 31, 23, 59, 59)
    }

    /// Surrogate-key field name on the output row.
    pub fn key_output_name(&self) -> &str {
        self.key_rename.as_deref().unwrap_or(&self.key_column)
    }

    /// Declared type of a stream field, defaulting to text.
    pub fn field_type(&self, field: &str) -> ValueType {
        // The event-date field is a date unless explicitly declared.
        if let Some(date_field) = &self.date_field {
            if field == date_field && !self.field_types.contains_key(field) {
                return ValueType::Date;
            }
        }
        self.field_types.get(field).copied().unwrap_or_default()
    }
}

fn sentinel_date(year: i32, month: u32, day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    // Years are validated before a run starts; fall back to the epoch so
    // this stays total for display paths.
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(h, m, s))
        .unwrap_or_default()
}

/// An example maintenance config, used by the `example-config` command
/// and the tests.
pub fn example_config() -> DimensionConfig {
    DimensionConfig {
        table: "dim_customer".to_string(),
        keys: vec![KeyMapping {
            stream: "customer_id".to_string(),
            column: "customer_id".to_string(),
        }],
        date_field: Some("event_date".to_string()),
        date_from_column: default_date_from(),
        date_to_column: default_date_to(),
        key_column: "customer_tk".to_string(),
        key_rename: None,
        version_column: "version".to_string(),
        not_found_key: 0,
        commit_size: default_commit_size(),
        min_year: default_min_year(),
        max_year: default_max_year(),
        key_source: KeySource::CounterTable,
        cache_size: default_cache_size(),
        field_types: HashMap::from([("customer_id".to_string(), ValueType::Integer)]),
        mode: Mode::Maintenance {
            fields: vec![
                TrackedField {
                    stream: Some("email".to_string()),
                    column: "email".to_string(),
                    policy: UpdatePolicy::Update,
                },
                TrackedField {
                    stream: Some("tier".to_string()),
                    column: "tier".to_string(),
                    policy: UpdatePolicy::Insert,
                },
            ],
        },
    }
}
