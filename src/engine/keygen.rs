//! Surrogate-key generation strategies.
//!
//! The configuration requests a strategy; the effective one also depends
//! on what the backend supports. An unsupported request falls back to the
//! counter table with a warning rather than failing the run.

use tracing::warn;

use crate::config::KeySource;
use crate::db::{Capabilities, Database};
use crate::error::DbResult;

/// Effective key-generation strategy for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyGenerator {
    /// The database assigns the key on insert.
    AutoIncrement,
    /// A native sequence object hands out keys.
    Sequence(String),
    /// The shared counter table hands out keys.
    CounterTable,
}

impl KeyGenerator {
    /// Pick the effective strategy for the requested source given what
    /// the backend can do.
    pub fn select(source: &KeySource, capabilities: Capabilities) -> Self {
        match source {
            KeySource::AutoIncrement if capabilities.auto_increment => KeyGenerator::AutoIncrement,
            KeySource::AutoIncrement => {
                warn!("database has no identity columns, falling back to the counter table");
                KeyGenerator::CounterTable
            }
            KeySource::Sequence { name } if capabilities.sequences => {
                KeyGenerator::Sequence(name.clone())
            }
            KeySource::Sequence { name } => {
                warn!(
                    sequence = %name,
                    "database has no sequences, falling back to the counter table"
                );
                KeyGenerator::CounterTable
            }
            KeySource::CounterTable => KeyGenerator::CounterTable,
        }
    }

    pub fn is_auto_increment(&self) -> bool {
        matches!(self, KeyGenerator::AutoIncrement)
    }

    /// Produce the next surrogate key, or `None` when the database will
    /// assign it on insert.
    pub fn next(
        &self,
        db: &mut dyn Database,
        table: &str,
        key_column: &str,
    ) -> DbResult<Option<i64>> {
        match self {
            KeyGenerator::AutoIncrement => Ok(None),
            KeyGenerator::Sequence(name) => db.next_sequence_value(name, key_column).map(Some),
            KeyGenerator::CounterTable => db.next_counter_value(table, key_column).map(Some),
        }
    }
}
