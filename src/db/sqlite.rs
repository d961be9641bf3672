//! SQLite implementation of the [`Database`] collaborator.
//!
//! One connection per worker, WAL journal and a busy timeout so that
//! parallel workers serialize on the database's own locking. Writes run
//! inside an explicit batch transaction committed every `commit_size`
//! rows.

use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::db::{Capabilities, Database};
use crate::error::{DbError, DbResult};
use crate::row::{Row, Value, ValueType, DATE_FORMAT};

/// Name of the shared surrogate-key counter table.
pub const COUNTER_TABLE: &str = "dimload_counters";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed dimension store.
pub struct SqliteDatabase {
    conn: Connection,
    commit_size: usize,
    pending_rows: usize,
    in_tx: bool,
}

impl SqliteDatabase {
    /// Open (or create) a database file.
    pub fn open(path: &str) -> DbResult<Self> {
        let conn = Connection::open(path).map_err(|source| DbError::Connect {
            path: path.to_string(),
            source,
        })?;
        Self::configure(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory().map_err(|source| DbError::Connect {
            path: ":memory:".to_string(),
            source,
        })?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> DbResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets readers proceed while a worker holds the write lock.
        // The pragma returns the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        Ok(Self {
            conn,
            commit_size: 100,
            pending_rows: 0,
            in_tx: false,
        })
    }

    /// Direct access for schema setup in callers and tests.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn begin_if_needed(&mut self) -> DbResult<()> {
        if !self.in_tx {
            // IMMEDIATE takes the write lock up front, avoiding upgrade
            // deadlocks between concurrent workers.
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            self.in_tx = true;
        }
        Ok(())
    }

    fn end_tx(&mut self, sql: &str) -> DbResult<()> {
        if self.in_tx {
            self.conn.execute_batch(sql)?;
            self.in_tx = false;
        }
        self.pending_rows = 0;
        Ok(())
    }
}

/// Convert engine values to SQLite parameters. Dates are stored as
/// fixed-width text so range predicates compare chronologically.
fn bind(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values
        .iter()
        .map(|v| match v {
            Value::Null => rusqlite::types::Value::Null,
            Value::Boolean(b) => rusqlite::types::Value::Integer(*b as i64),
            Value::Integer(i) => rusqlite::types::Value::Integer(*i),
            Value::Number(n) => rusqlite::types::Value::Real(*n),
            Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
            Value::Date(d) => rusqlite::types::Value::Text(d.format(DATE_FORMAT).to_string()),
        })
        .collect()
}

/// Decode one result row against the expected column types.
fn decode(row: &rusqlite::Row<'_>, types: &[ValueType]) -> DbResult<Row> {
    let mut out = Vec::with_capacity(types.len());
    for (i, vtype) in types.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => match vtype {
                ValueType::Boolean => Value::Boolean(n != 0),
                ValueType::Number => Value::Number(n as f64),
                _ => Value::Integer(n),
            },
            ValueRef::Real(f) => match vtype {
                ValueType::Integer => Value::Integer(f as i64),
                _ => Value::Number(f),
            },
            ValueRef::Text(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                match vtype {
                    ValueType::Date => match Value::parse_date(&text) {
                        Some(d) => Value::Date(d),
                        None => {
                            return Err(DbError::BadValue {
                                column: i,
                                message: format!("'{}' is not a date", text),
                            })
                        }
                    },
                    ValueType::Integer => text
                        .trim()
                        .parse::<i64>()
                        .map(Value::Integer)
                        .unwrap_or_else(|_| Value::Text(text.into_owned())),
                    _ => Value::Text(text.into_owned()),
                }
            }
            ValueRef::Blob(_) => {
                return Err(DbError::BadValue {
                    column: i,
                    message: "blob columns are not supported".to_string(),
                })
            }
        };
        out.push(value);
    }
    Ok(out)
}

impl Database for SqliteDatabase {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            auto_increment: true,
            sequences: false,
        }
    }

    fn set_commit_size(&mut self, rows: usize) {
        self.commit_size = rows;
    }

    fn query_one(
        &mut self,
        sql: &str,
        params: &[Value],
        types: &[ValueType],
    ) -> DbResult<Option<Row>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let result = stmt
            .query_row(params_from_iter(bind(params)), |r| {
                // Defer decoding errors out of the rusqlite closure.
                Ok(decode(r, types))
            })
            .optional()?;
        match result {
            None => Ok(None),
            Some(decoded) => Ok(Some(decoded?)),
        }
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<usize> {
        self.begin_if_needed()?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(bind(params)))?)
    }

    fn insert_returning_key(&mut self, sql: &str, params: &[Value], table: &str) -> DbResult<i64> {
        self.begin_if_needed()?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        let affected = stmt.execute(params_from_iter(bind(params)))?;
        if affected != 1 {
            return Err(DbError::NoGeneratedKey(table.to_string()));
        }
        Ok(self.conn.last_insert_rowid())
    }

    fn next_sequence_value(&mut self, sequence: &str, _key_column: &str) -> DbResult<i64> {
        Err(DbError::SequenceUnsupported(sequence.to_string()))
    }

    fn next_counter_value(&mut self, table: &str, key_column: &str) -> DbResult<i64> {
        self.begin_if_needed()?;
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {COUNTER_TABLE} \
                 (table_name TEXT PRIMARY KEY, next_key INTEGER NOT NULL)"
            ),
            [],
        )?;
        // Seed from the current key high-water mark, then increment
        // atomically under the write lock we already hold.
        let sql = format!(
            "INSERT INTO {COUNTER_TABLE} (table_name, next_key) \
             VALUES (?1, (SELECT COALESCE(MAX({key_column}), 0) + 1 FROM {table})) \
             ON CONFLICT(table_name) DO UPDATE SET next_key = next_key + 1 \
             RETURNING next_key"
        );
        let key = self.conn.query_row(&sql, params![table], |r| r.get(0))?;
        Ok(key)
    }

    fn seed_not_found_row(
        &mut self,
        table: &str,
        key_column: &str,
        version_column: &str,
        auto_increment: bool,
    ) -> DbResult<()> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT count(*) FROM {table} WHERE {key_column} = 0"),
            [],
            |r| r.get(0),
        )?;
        if count > 0 {
            return Ok(());
        }
        if auto_increment {
            // Once the identity column has handed out keys we cannot
            // slip a 0 underneath them anymore.
            let total: i64 =
                self.conn
                    .query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))?;
            if total > 0 {
                return Ok(());
            }
        }
        self.conn.execute(
            &format!("INSERT INTO {table} ({key_column}, {version_column}) VALUES (0, 1)"),
            [],
        )?;
        Ok(())
    }

    fn table_columns(&mut self, table: &str) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn row_done(&mut self) -> DbResult<()> {
        if !self.in_tx {
            return Ok(());
        }
        self.pending_rows += 1;
        if self.pending_rows >= self.commit_size.max(1) {
            self.commit()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> DbResult<()> {
        self.end_tx("COMMIT")
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.end_tx("ROLLBACK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer_table(db: &SqliteDatabase) {
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
    }

    #[test]
    fn test_query_one_decodes_types() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        customer_table(&db);
        db.execute(
            "INSERT INTO dim_customer (customer_tk, version, customer_id, email, valid_from, valid_to) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            &[
                Value::Integer(1001),
                Value::Integer(1),
                Value::Integer(42),
                Value::Text("a@x.com".into()),
                Value::Text("1900-01-01 00:00:00".into()),
                Value::Text("2199-12-31 23:59:59".into()),
            ],
        )
        .unwrap();
        db.commit().unwrap();

        let row = db
            .query_one(
                "SELECT customer_tk, version, email, valid_from FROM dim_customer WHERE customer_id = ?1",
                &[Value::Integer(42)],
                &[
                    ValueType::Integer,
                    ValueType::Integer,
                    ValueType::Text,
                    ValueType::Date,
                ],
            )
            .unwrap()
            .unwrap();

        assert_eq!(row[0], Value::Integer(1001));
        assert_eq!(row[2], Value::Text("a@x.com".into()));
        assert!(matches!(row[3], Value::Date(_)));
    }

    #[test]
    fn test_query_one_not_found() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        customer_table(&db);
        let row = db
            .query_one(
                "SELECT customer_tk FROM dim_customer WHERE customer_id = ?1",
                &[Value::Integer(7)],
                &[ValueType::Integer],
            )
            .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn test_counter_seeds_from_existing_keys() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        customer_table(&db);
        db.execute(
            "INSERT INTO dim_customer (customer_tk, version) VALUES (1000, 1)",
            &[],
        )
        .unwrap();

        assert_eq!(
            db.next_counter_value("dim_customer", "customer_tk").unwrap(),
            1001
        );
        assert_eq!(
            db.next_counter_value("dim_customer", "customer_tk").unwrap(),
            1002
        );
    }

    #[test]
    fn test_seed_not_found_row_is_idempotent() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        customer_table(&db);
        db.seed_not_found_row("dim_customer", "customer_tk", "version", false)
            .unwrap();
        db.seed_not_found_row("dim_customer", "customer_tk", "version", false)
            .unwrap();

        let count: i64 = db
            .connection()
            .query_row(
                "SELECT count(*) FROM dim_customer WHERE customer_tk = 0",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_commit_batching() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        customer_table(&db);
        db.set_commit_size(2);

        db.execute(
            "INSERT INTO dim_customer (customer_tk, version) VALUES (1, 1)",
            &[],
        )
        .unwrap();
        db.row_done().unwrap();
        assert!(db.in_tx, "first row stays in the open batch");

        db.execute(
            "INSERT INTO dim_customer (customer_tk, version) VALUES (2, 1)",
            &[],
        )
        .unwrap();
        db.row_done().unwrap();
        assert!(!db.in_tx, "second row triggers the commit");
    }

    #[test]
    fn test_rollback_discards_open_batch() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        customer_table(&db);
        db.set_commit_size(100);
        db.execute(
            "INSERT INTO dim_customer (customer_tk, version) VALUES (9, 1)",
            &[],
        )
        .unwrap();
        db.rollback().unwrap();

        let count: i64 = db
            .connection()
            .query_row("SELECT count(*) FROM dim_customer", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_table_columns() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        customer_table(&db);
        let cols = db.table_columns("dim_customer").unwrap();
        assert!(cols.contains(&"customer_tk".to_string()));
        assert!(cols.contains(&"valid_to".to_string()));
    }
}
