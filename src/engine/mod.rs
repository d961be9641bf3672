//! The dimension engine.
//!
//! Modules follow the per-row pipeline: resolve field indexes against the
//! input schema, look up the active version for the natural key, decide
//! what changed, then write the outcome back through the
//! [`writer::DimensionWriter`]. The [`worker::Worker`] ties the stages
//! together; one worker owns one database connection and processes rows
//! strictly in order.

pub mod decision;
pub mod keygen;
pub mod lookup;
pub mod schema;
pub mod worker;
pub mod writer;

pub use decision::{decide, Decision, VersionAction};
pub use keygen::KeyGenerator;
pub use lookup::LookupResolver;
pub use schema::FieldIndexes;
pub use worker::{BoundsTracker, RunStats, Worker};
pub use writer::DimensionWriter;

use chrono::NaiveDateTime;

use crate::row::Row;

/// One version row of the dimension table, as seen by the engine.
///
/// `values` is parallel to the configured tracked fields (maintenance) or
/// return fields (lookup); audit columns carry `Null` placeholders since
/// they are never compared.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionRow {
    pub surrogate_key: i64,
    pub version: i64,
    pub values: Row,
    pub valid_from: NaiveDateTime,
    pub valid_to: NaiveDateTime,
}

impl DimensionRow {
    /// Whether `date` falls inside this version's half-open validity
    /// window `[valid_from, valid_to)`.
    pub fn covers(&self, date: NaiveDateTime) -> bool {
        date >= self.valid_from && date < self.valid_to
    }
}
