//! One worker: one database connection, rows processed strictly in
//! arrival order.
//!
//! All rows of a natural key must pass through the same worker; the
//! partitioning in the runner guarantees that. Nothing here is shared
//! between workers except the database itself.

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

use crate::config::DimensionConfig;
use crate::db::Database;
use crate::engine::{decide, DimensionRow, FieldIndexes, KeyGenerator, LookupResolver};
use crate::engine::{lookup, DimensionWriter, VersionAction};
use crate::error::{DbError, RunError, RunResult};
use crate::row::{Row, Schema, Value, ValueType};

/// Row counters for one run (or one worker's share of it).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub rows_read: usize,
    /// New version rows written, including first sightings.
    pub inserts: usize,
    pub updates_in_place: usize,
    pub punch_throughs: usize,
    pub no_changes: usize,
    /// Lookup-mode rows that resolved to the not-found key.
    pub not_found: usize,
}

impl RunStats {
    pub fn merge(&mut self, other: &RunStats) {
        self.rows_read += other.rows_read;
        self.inserts += other.inserts;
        self.updates_in_place += other.updates_in_place;
        self.punch_throughs += other.punch_throughs;
        self.no_changes += other.no_changes;
        self.not_found += other.not_found;
    }
}

/// Smallest and largest event date seen during a run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BoundsTracker {
    pub min: Option<NaiveDateTime>,
    pub max: Option<NaiveDateTime>,
}

impl BoundsTracker {
    pub fn observe(&mut self, date: NaiveDateTime) {
        self.min = Some(self.min.map_or(date, |m| m.min(date)));
        self.max = Some(self.max.map_or(date, |m| m.max(date)));
    }

    pub fn merge(&mut self, other: &BoundsTracker) {
        if let Some(d) = other.min {
            self.observe(d);
        }
        if let Some(d) = other.max {
            self.observe(d);
        }
    }
}

/// The per-row dimension pipeline bound to one connection.
pub struct Worker<D: Database> {
    db: D,
    config: DimensionConfig,
    indexes: FieldIndexes,
    resolver: LookupResolver,
    /// Present in maintenance mode only.
    writer: Option<DimensionWriter>,
    keygen: KeyGenerator,
    stats: RunStats,
    bounds: BoundsTracker,
}

/// Output layout: the input fields, then the surrogate key, then (in
/// lookup mode) the returned columns.
pub fn output_schema(config: &DimensionConfig, input: &Schema) -> Schema {
    let mut schema = input.clone();
    schema.push(config.key_output_name(), ValueType::Integer);
    for ret in config.return_fields() {
        schema.push(ret.output_name(), ret.value_type);
    }
    schema
}

impl<D: Database> Worker<D> {
    /// Bind a worker to its connection and resolve everything that is
    /// fixed for the run. In maintenance mode worker 0 also seeds the
    /// not-found sentinel row, committed immediately so sibling workers
    /// see it.
    pub fn open(
        config: DimensionConfig,
        schema: &Schema,
        mut db: D,
        worker_index: usize,
    ) -> RunResult<Self> {
        let indexes = FieldIndexes::resolve(&config, schema)?;
        db.set_commit_size(config.commit_size);
        let keygen = KeyGenerator::select(&config.key_source, db.capabilities());
        debug!(worker = worker_index, strategy = ?keygen, "worker ready");

        if worker_index == 0 && config.is_maintenance() {
            db.seed_not_found_row(
                &config.table,
                &config.key_column,
                &config.version_column,
                keygen.is_auto_increment(),
            )?;
            db.commit()?;
        }

        let resolver = LookupResolver::new(&config);
        let writer = if config.is_maintenance() {
            Some(DimensionWriter::new(&config, keygen.is_auto_increment()))
        } else {
            None
        };

        Ok(Self {
            db,
            config,
            indexes,
            resolver,
            writer,
            keygen,
            stats: RunStats::default(),
            bounds: BoundsTracker::default(),
        })
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn bounds(&self) -> &BoundsTracker {
        &self.bounds
    }

    pub fn database(&mut self) -> &mut D {
        &mut self.db
    }

    /// Process one input row and return it augmented with the surrogate
    /// key (and the returned columns in lookup mode).
    pub fn process(&mut self, row: &Row, row_index: usize) -> RunResult<Row> {
        self.stats.rows_read += 1;

        let event_date = self.event_date(row, row_index)?;
        self.bounds.observe(event_date);

        let key_values: Vec<Value> = self.indexes.keys.iter().map(|&i| row[i].clone()).collect();
        let key_print = lookup::fingerprint(&key_values);
        let wrap = |source: DbError| RunError::RowDb {
            row: row_index,
            key: key_print.clone(),
            source,
        };

        let existing = self
            .resolver
            .find(&mut self.db, &key_values, event_date)
            .map_err(&wrap)?;

        let mut output = row.clone();
        match &self.writer {
            None => {
                // Lookup mode: augment only, never write.
                match existing {
                    Some(hit) => {
                        output.push(Value::Integer(hit.surrogate_key));
                        output.extend(hit.values);
                    }
                    None => {
                        self.stats.not_found += 1;
                        output.push(Value::Integer(self.config.not_found_key));
                        output.extend(
                            std::iter::repeat(Value::Null)
                                .take(self.config.return_fields().len()),
                        );
                    }
                }
            }
            Some(writer) => {
                let incoming: Vec<Value> = self
                    .indexes
                    .tracked
                    .iter()
                    .map(|slot| slot.map(|i| row[i].clone()).unwrap_or(Value::Null))
                    .collect();

                let surrogate_key = match existing {
                    None => {
                        // First sighting: one version covering the whole
                        // timeline, so earlier event dates still resolve.
                        let key = self
                            .keygen
                            .next(&mut self.db, &self.config.table, &self.config.key_column)
                            .map_err(&wrap)?;
                        let tk = writer
                            .insert_version(
                                &mut self.db,
                                key,
                                1,
                                self.config.min_date(),
                                self.config.max_date(),
                                &key_values,
                                &incoming,
                            )
                            .map_err(&wrap)?;
                        self.stats.inserts += 1;
                        self.resolver.store(
                            &key_values,
                            DimensionRow {
                                surrogate_key: tk,
                                version: 1,
                                values: incoming,
                                valid_from: self.config.min_date(),
                                valid_to: self.config.max_date(),
                            },
                        );
                        tk
                    }
                    Some(current) => {
                        let decision =
                            decide(self.config.tracked_fields(), &incoming, &current.values);

                        let mut merged = current.values.clone();
                        for &i in &decision.changed {
                            merged[i] = incoming[i].clone();
                        }

                        let tk = match decision.action {
                            VersionAction::NoChange => {
                                if decision.is_no_op() {
                                    self.stats.no_changes += 1;
                                } else {
                                    self.resolver.store(
                                        &key_values,
                                        DimensionRow {
                                            values: merged.clone(),
                                            ..current.clone()
                                        },
                                    );
                                }
                                current.surrogate_key
                            }
                            VersionAction::UpdateInPlace => {
                                writer
                                    .update_in_place(
                                        &mut self.db,
                                        &key_values,
                                        current.version,
                                        &decision.changed,
                                        &incoming,
                                        event_date,
                                    )
                                    .map_err(&wrap)?;
                                self.stats.updates_in_place += 1;
                                self.resolver.store(
                                    &key_values,
                                    DimensionRow {
                                        values: merged.clone(),
                                        ..current.clone()
                                    },
                                );
                                current.surrogate_key
                            }
                            VersionAction::InsertNewVersion => {
                                // Close first so the new window starts
                                // exactly where the old one ends.
                                writer
                                    .close_version(
                                        &mut self.db,
                                        &key_values,
                                        current.version,
                                        event_date,
                                    )
                                    .map_err(&wrap)?;
                                let key = self
                                    .keygen
                                    .next(
                                        &mut self.db,
                                        &self.config.table,
                                        &self.config.key_column,
                                    )
                                    .map_err(&wrap)?;
                                let tk = writer
                                    .insert_version(
                                        &mut self.db,
                                        key,
                                        current.version + 1,
                                        event_date,
                                        self.config.max_date(),
                                        &key_values,
                                        &incoming,
                                    )
                                    .map_err(&wrap)?;
                                self.stats.inserts += 1;
                                self.resolver.store(
                                    &key_values,
                                    DimensionRow {
                                        surrogate_key: tk,
                                        version: current.version + 1,
                                        values: incoming,
                                        valid_from: event_date,
                                        valid_to: self.config.max_date(),
                                    },
                                );
                                tk
                            }
                        };

                        if decision.punch_through {
                            writer
                                .punch_through(&mut self.db, &key_values, &merged)
                                .map_err(&wrap)?;
                            self.stats.punch_throughs += 1;
                        }
                        tk
                    }
                };
                output.push(Value::Integer(surrogate_key));
            }
        }

        self.db.row_done().map_err(wrap)?;
        Ok(output)
    }

    /// Commit the open batch and return this worker's counters.
    pub fn finish(&mut self) -> RunResult<(RunStats, BoundsTracker)> {
        self.db.commit()?;
        Ok((self.stats.clone(), self.bounds))
    }

    /// Roll back the open batch after a failure. Best effort.
    pub fn abort(&mut self) {
        let _ = self.db.rollback();
    }

    fn event_date(&self, row: &Row, row_index: usize) -> RunResult<NaiveDateTime> {
        match self.indexes.date {
            None => Ok(chrono::Local::now().naive_local()),
            Some(i) => match &row[i] {
                Value::Date(d) => Ok(*d),
                Value::Null => Err(RunError::NullEventDate {
                    row: row_index,
                    field: self.config.date_field.clone().unwrap_or_default(),
                }),
                other => Err(RunError::BadEventDate {
                    row: row_index,
                    field: self.config.date_field.clone().unwrap_or_default(),
                    value: other.to_string(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{example_config, Mode, ReturnField, TrackedField, UpdatePolicy};
    use crate::db::SqliteDatabase;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> Value {
        Value::Date(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    fn dim_db() -> SqliteDatabase {
        let db = SqliteDatabase::open_in_memory().unwrap();
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
        db
    }

    fn input_schema() -> Schema {
        Schema::from_headers(
            vec!["customer_id", "event_date", "email", "tier"],
            &|name| match name {
                "customer_id" => ValueType::Integer,
                "event_date" => ValueType::Date,
                _ => ValueType::Text,
            },
        )
    }

    fn customer_row(id: i64, date: Value, email: &str, tier: &str) -> Row {
        vec![
            Value::Integer(id),
            date,
            Value::Text(email.into()),
            Value::Text(tier.into()),
        ]
    }

    fn versions(worker: &mut Worker<SqliteDatabase>) -> Vec<(i64, i64, String, String, String)> {
        let conn = worker.database().connection();
        let mut stmt = conn
            .prepare(
                "SELECT customer_tk, version, tier, valid_from, valid_to \
                 FROM dim_customer WHERE customer_id = 42 ORDER BY version",
            )
            .unwrap();
        let rows = stmt
            .query_map([], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
            })
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows
    }

    #[test]
    fn test_maintenance_lifecycle_for_one_key() {
        let mut worker = Worker::open(example_config(), &input_schema(), dim_db(), 0).unwrap();

        // First sighting: a version covering the whole timeline.
        let out = worker
            .process(&customer_row(42, at(2024, 1, 15), "a@x", "gold"), 1)
            .unwrap();
        let tk1 = out.last().unwrap().as_i64().unwrap();
        assert_eq!(worker.stats().inserts, 1);

        // Identical replay: nothing written.
        worker
            .process(&customer_row(42, at(2024, 2, 1), "a@x", "gold"), 2)
            .unwrap();
        assert_eq!(worker.stats().no_changes, 1);

        // email has the update policy: amended in place, same version.
        let out = worker
            .process(&customer_row(42, at(2024, 3, 1), "b@x", "gold"), 3)
            .unwrap();
        assert_eq!(out.last().unwrap().as_i64().unwrap(), tk1);
        assert_eq!(worker.stats().updates_in_place, 1);

        // tier has the insert policy: the timeline splits.
        let out = worker
            .process(&customer_row(42, at(2024, 6, 1), "b@x", "silver"), 4)
            .unwrap();
        let tk2 = out.last().unwrap().as_i64().unwrap();
        assert_ne!(tk2, tk1);
        assert_eq!(worker.stats().inserts, 2);

        worker.finish().unwrap();

        let rows = versions(&mut worker);
        assert_eq!(rows.len(), 2);
        let (_, v1, ref tier1, ref from1, ref to1) = rows[0];
        let (_, v2, ref tier2, ref from2, _) = rows[1];
        assert_eq!((v1, tier1.as_str()), (1, "gold"));
        assert_eq!((v2, tier2.as_str()), (2, "silver"));
        // Contiguous half-open windows, starting at the sentinel.
        assert_eq!(from1, "1900-01-01 00:00:00");
        assert_eq!(to1, from2);
        assert_eq!(from2, "2024-06-01 00:00:00");
    }

    #[test]
    fn test_replay_is_idempotent() {
        let mut worker = Worker::open(example_config(), &input_schema(), dim_db(), 0).unwrap();
        for round in 0..3 {
            worker
                .process(&customer_row(42, at(2024, 1, 15), "a@x", "gold"), round + 1)
                .unwrap();
        }
        worker.finish().unwrap();
        assert_eq!(worker.stats().inserts, 1);
        assert_eq!(worker.stats().no_changes, 2);
        assert_eq!(versions(&mut worker).len(), 1);
    }

    fn punch_config() -> crate::config::DimensionConfig {
        let mut config = example_config();
        if let Mode::Maintenance { fields } = &mut config.mode {
            fields.push(TrackedField {
                stream: Some("region".into()),
                column: "region".into(),
                policy: UpdatePolicy::Punchthrough,
            });
        }
        config
    }

    fn punch_schema() -> Schema {
        Schema::from_headers(
            vec!["customer_id", "event_date", "email", "tier", "region"],
            &|name| match name {
                "customer_id" => ValueType::Integer,
                "event_date" => ValueType::Date,
                _ => ValueType::Text,
            },
        )
    }

    fn punch_row(id: i64, date: Value, email: &str, tier: &str, region: &str) -> Row {
        vec![
            Value::Integer(id),
            date,
            Value::Text(email.into()),
            Value::Text(tier.into()),
            Value::Text(region.into()),
        ]
    }

    #[test]
    fn test_punch_through_alongside_update_and_insert() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.connection()
            .execute_batch(
                "CREATE TABLE dim_customer (
                    customer_tk INTEGER PRIMARY KEY,
                    version INTEGER,
                    customer_id INTEGER,
                    email TEXT,
                    tier TEXT,
                    region TEXT,
                    valid_from TEXT,
                    valid_to TEXT
                )",
            )
            .unwrap();
        let mut worker = Worker::open(punch_config(), &punch_schema(), db, 0).unwrap();

        worker
            .process(&punch_row(42, at(2024, 1, 1), "a@x", "gold", "eu"), 1)
            .unwrap();
        worker
            .process(&punch_row(42, at(2024, 3, 1), "a@x", "silver", "eu"), 2)
            .unwrap();

        // Punch-only: no new version, the correction reaches history.
        worker
            .process(&punch_row(42, at(2024, 4, 1), "a@x", "silver", "apac"), 3)
            .unwrap();
        assert_eq!(worker.stats().punch_throughs, 1);
        assert_eq!(worker.stats().inserts, 2);

        // Punch together with an in-place email change.
        worker
            .process(&punch_row(42, at(2024, 5, 1), "b@x", "silver", "emea"), 4)
            .unwrap();
        assert_eq!(worker.stats().punch_throughs, 2);
        assert_eq!(worker.stats().updates_in_place, 1);

        // Punch together with a version-splitting tier change.
        worker
            .process(&punch_row(42, at(2024, 6, 1), "b@x", "bronze", "latam"), 5)
            .unwrap();
        assert_eq!(worker.stats().punch_throughs, 3);
        assert_eq!(worker.stats().inserts, 3);
        worker.finish().unwrap();

        let conn = worker.database().connection();
        let versions: i64 = conn
            .query_row(
                "SELECT count(*) FROM dim_customer WHERE customer_id = 42",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(versions, 3);
        // Every version carries the latest punched value.
        let punched: i64 = conn
            .query_row(
                "SELECT count(*) FROM dim_customer WHERE customer_id = 42 AND region = 'latam'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(punched, 3);
        // The in-place email change stayed on version 2 only.
        let emails: Vec<String> = conn
            .prepare(
                "SELECT email FROM dim_customer WHERE customer_id = 42 ORDER BY version",
            )
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(emails, vec!["a@x", "b@x", "b@x"]);
    }

    #[test]
    fn test_worker_zero_seeds_sentinel_row() {
        let mut worker = Worker::open(example_config(), &input_schema(), dim_db(), 0).unwrap();
        let count: i64 = worker
            .database()
            .connection()
            .query_row(
                "SELECT count(*) FROM dim_customer WHERE customer_tk = 0 AND version = 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_nonzero_workers_do_not_seed() {
        let mut worker = Worker::open(example_config(), &input_schema(), dim_db(), 1).unwrap();
        let count: i64 = worker
            .database()
            .connection()
            .query_row("SELECT count(*) FROM dim_customer", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_null_event_date_is_an_error() {
        let mut worker = Worker::open(example_config(), &input_schema(), dim_db(), 0).unwrap();
        let err = worker
            .process(&customer_row(42, Value::Null, "a@x", "gold"), 5)
            .unwrap_err();
        assert!(matches!(err, RunError::NullEventDate { row: 5, .. }));
    }

    fn lookup_config() -> crate::config::DimensionConfig {
        let mut config = example_config();
        config.key_rename = Some("customer_key".into());
        config.mode = Mode::Lookup {
            returns: vec![ReturnField {
                column: "email".into(),
                rename: None,
                value_type: ValueType::Text,
            }],
        };
        config
    }

    #[test]
    fn test_lookup_resolves_version_by_event_date() {
        let db = dim_db();
        db.connection()
            .execute_batch(
                "INSERT INTO dim_customer VALUES
                    (1, 1, 42, 'old@x', 'gold', '1900-01-01 00:00:00', '2024-06-01 00:00:00'),
                    (2, 2, 42, 'new@x', 'gold', '2024-06-01 00:00:00', '2199-12-31 23:59:59')",
            )
            .unwrap();

        let mut worker = Worker::open(lookup_config(), &input_schema(), db, 0).unwrap();

        let out = worker
            .process(&customer_row(42, at(2024, 3, 1), "", ""), 1)
            .unwrap();
        assert_eq!(out[4], Value::Integer(1));
        assert_eq!(out[5], Value::Text("old@x".into()));

        let out = worker
            .process(&customer_row(42, at(2024, 7, 1), "", ""), 2)
            .unwrap();
        assert_eq!(out[4], Value::Integer(2));
        assert_eq!(out[5], Value::Text("new@x".into()));
    }

    #[test]
    fn test_lookup_miss_returns_not_found_key() {
        let mut worker = Worker::open(lookup_config(), &input_schema(), dim_db(), 1).unwrap();
        let out = worker
            .process(&customer_row(99, at(2024, 3, 1), "", ""), 1)
            .unwrap();
        assert_eq!(out[4], Value::Integer(0));
        assert_eq!(out[5], Value::Null);
        assert_eq!(worker.stats().not_found, 1);
    }

    #[test]
    fn test_output_schema_appends_key_and_returns() {
        let schema = output_schema(&lookup_config(), &input_schema());
        let names = schema.names();
        assert_eq!(
            names,
            vec!["customer_id", "event_date", "email", "tier", "customer_key", "email"]
        );
    }
}
