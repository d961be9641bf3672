//! Database collaborator boundary.
//!
//! The engine talks to the dimension store exclusively through the
//! [`Database`] trait: a parameterized-SQL surface plus the handful of
//! warehouse-specific helpers (counter table, sequence, sentinel-row
//! seeding). All calls are synchronous and blocking on the worker's own
//! thread; each worker owns exactly one connection.
//!
//! Key-generation strategy selection branches on the [`Capabilities`]
//! probe rather than on backend-specific flags sprinkled through the
//! engine.

pub mod sqlite;

pub use sqlite::SqliteDatabase;

use crate::error::DbResult;
use crate::row::{Row, Value, ValueType};

/// What the backend can do natively; drives key-generator selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Identity columns that assign keys on insert.
    pub auto_increment: bool,
    /// Native sequence objects.
    pub sequences: bool,
}

/// Synchronous SQL surface consumed by the dimension engine.
///
/// Commit batching is the backend's concern: writes accumulate in an open
/// transaction and [`Database::row_done`] ticks the per-row counter that
/// triggers a commit every `commit_size` rows.
pub trait Database {
    fn capabilities(&self) -> Capabilities;

    /// Rows between commits; 0 commits after every row.
    fn set_commit_size(&mut self, rows: usize);

    /// Run a query expected to return zero or one row. Columns are
    /// decoded left to right against `types`.
    fn query_one(&mut self, sql: &str, params: &[Value], types: &[ValueType])
        -> DbResult<Option<Row>>;

    /// Execute a statement, returning the affected row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<usize>;

    /// Execute an INSERT against an identity column and return the key
    /// the database generated.
    fn insert_returning_key(&mut self, sql: &str, params: &[Value], table: &str) -> DbResult<i64>;

    /// Next value of a native sequence object.
    fn next_sequence_value(&mut self, sequence: &str, key_column: &str) -> DbResult<i64>;

    /// Atomically increment-and-read the shared counter row for `table`,
    /// seeding it from `MAX(key_column)` on first use. Safe under
    /// concurrent workers via the database's own locking.
    fn next_counter_value(&mut self, table: &str, key_column: &str) -> DbResult<i64>;

    /// Idempotently ensure the sentinel not-found row (key = 0,
    /// version = 1) exists in `table`.
    fn seed_not_found_row(
        &mut self,
        table: &str,
        key_column: &str,
        version_column: &str,
        auto_increment: bool,
    ) -> DbResult<()>;

    /// Column names of a table, for pre-flight validation.
    fn table_columns(&mut self, table: &str) -> DbResult<Vec<String>>;

    /// Signal that one input row has been fully processed; commits the
    /// open batch when the commit size is reached.
    fn row_done(&mut self) -> DbResult<()>;

    /// Commit any open batch.
    fn commit(&mut self) -> DbResult<()>;

    /// Roll back any open batch.
    fn rollback(&mut self) -> DbResult<()>;
}
