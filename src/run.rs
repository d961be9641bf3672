//! Run orchestration: wire a row source to one or more workers.
//!
//! A run validates the configuration, pre-flights the dimension table,
//! then drives rows through the workers. With several workers the input
//! is partitioned by natural key so that every key sees exactly one
//! connection, preserving per-key ordering; output rows are re-assembled
//! in input order.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::config::DimensionConfig;
use crate::db::Database;
use crate::engine::lookup;
use crate::engine::worker::{output_schema, BoundsTracker, RunStats, Worker};
use crate::engine::FieldIndexes;
use crate::error::{DbResult, RunError, RunResult};
use crate::row::{Row, RowStream, Schema, Value};
use crate::validation;

/// Knobs of one run.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Number of workers; 0 and 1 both mean a single worker.
    pub workers: usize,
    /// Cooperative stop flag, checked between rows. A stopped run
    /// commits what it has processed.
    pub stop: Option<Arc<AtomicBool>>,
}

impl RunOptions {
    fn should_stop(&self) -> bool {
        self.stop
            .as_ref()
            .map(|s| s.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// Everything a finished run reports back.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Input schema plus the appended key / return fields.
    pub schema: Schema,
    /// Output rows, in input order.
    pub rows: Vec<Row>,
    pub stats: RunStats,
    pub bounds: BoundsTracker,
    /// True when the stop flag ended the run early.
    pub stopped: bool,
}

/// Run one dimension job end to end.
///
/// `make_db` opens one connection per worker index; it is called once
/// for pre-flight and once per worker.
pub fn run_job<D, F>(
    config: &DimensionConfig,
    source: &mut dyn RowStream,
    make_db: F,
    options: &RunOptions,
) -> RunResult<RunReport>
where
    D: Database + Send,
    F: Fn(usize) -> DbResult<D> + Sync,
{
    validation::validate_config(config)?;
    let mut db = make_db(0)?;
    validation::preflight(config, &mut db)?;

    let run_id = Uuid::new_v4();
    let input_schema = source.schema().clone();
    let schema = output_schema(config, &input_schema);
    info!(
        %run_id,
        table = %config.table,
        mode = if config.is_maintenance() { "maintenance" } else { "lookup" },
        workers = options.workers.max(1),
        "starting dimension run"
    );

    let report = if options.workers <= 1 {
        run_single(config, source, db, options, run_id, schema)
    } else {
        drop(db);
        run_parallel(config, source, &make_db, options, run_id, schema, &input_schema)
    }?;

    info!(
        run_id = %report.run_id,
        rows = report.stats.rows_read,
        inserts = report.stats.inserts,
        updates = report.stats.updates_in_place,
        stopped = report.stopped,
        "dimension run finished"
    );
    Ok(report)
}

fn run_single<D: Database>(
    config: &DimensionConfig,
    source: &mut dyn RowStream,
    db: D,
    options: &RunOptions,
    run_id: Uuid,
    schema: Schema,
) -> RunResult<RunReport> {
    let mut worker = Worker::open(config.clone(), source.schema(), db, 0)?;
    let mut rows = Vec::new();
    let mut stopped = false;
    let mut row_index = 1usize;

    loop {
        if options.should_stop() {
            stopped = true;
            break;
        }
        let row = match source.next_row() {
            Ok(None) => break,
            Ok(Some(row)) => row,
            Err(e) => {
                worker.abort();
                return Err(e.into());
            }
        };
        match worker.process(&row, row_index) {
            Ok(out) => rows.push(out),
            Err(e) => {
                worker.abort();
                return Err(e);
            }
        }
        row_index += 1;
    }

    let (stats, bounds) = worker.finish()?;
    Ok(RunReport {
        run_id,
        schema,
        rows,
        stats,
        bounds,
        stopped,
    })
}

fn partition_of(row: &Row, key_indexes: &[usize], workers: usize) -> usize {
    let key_values: Vec<Value> = key_indexes.iter().map(|&i| row[i].clone()).collect();
    let mut hasher = DefaultHasher::new();
    lookup::fingerprint(&key_values).hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

#[allow(clippy::too_many_arguments)]
fn run_parallel<D, F>(
    config: &DimensionConfig,
    source: &mut dyn RowStream,
    make_db: &F,
    options: &RunOptions,
    run_id: Uuid,
    schema: Schema,
    input_schema: &Schema,
) -> RunResult<RunReport>
where
    D: Database + Send,
    F: Fn(usize) -> DbResult<D> + Sync,
{
    let workers = options.workers;
    let indexes = FieldIndexes::resolve(config, input_schema)?;

    // The same natural key always lands on the same worker, so per-key
    // row order is preserved even though workers run concurrently.
    let mut partitions: Vec<Vec<(usize, Row)>> = vec![Vec::new(); workers];
    let mut row_index = 1usize;
    while let Some(row) = source.next_row()? {
        let p = partition_of(&row, &indexes.keys, workers);
        partitions[p].push((row_index, row));
        row_index += 1;
    }

    let mut results: Vec<RunResult<(Vec<(usize, Row)>, RunStats, BoundsTracker, bool)>> =
        Vec::with_capacity(workers);
    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for (w, part) in partitions.into_iter().enumerate() {
            let handle = scope.spawn(move || {
                let db = make_db(w)?;
                let mut worker = Worker::open(config.clone(), input_schema, db, w)?;
                let mut out = Vec::with_capacity(part.len());
                let mut stopped = false;
                for (index, row) in &part {
                    if options.should_stop() {
                        stopped = true;
                        break;
                    }
                    match worker.process(row, *index) {
                        Ok(augmented) => out.push((*index, augmented)),
                        Err(e) => {
                            worker.abort();
                            return Err(e);
                        }
                    }
                }
                let (stats, bounds) = worker.finish()?;
                Ok((out, stats, bounds, stopped))
            });
            handles.push(handle);
        }
        for (w, handle) in handles.into_iter().enumerate() {
            results.push(handle.join().unwrap_or(Err(RunError::WorkerPanic(w))));
        }
    });

    let mut rows: Vec<(usize, Row)> = Vec::new();
    let mut stats = RunStats::default();
    let mut bounds = BoundsTracker::default();
    let mut stopped = false;
    for result in results {
        let (out, worker_stats, worker_bounds, worker_stopped) = result?;
        rows.extend(out);
        stats.merge(&worker_stats);
        bounds.merge(&worker_bounds);
        stopped |= worker_stopped;
    }
    rows.sort_by_key(|(index, _)| *index);

    Ok(RunReport {
        run_id,
        schema,
        rows: rows.into_iter().map(|(_, row)| row).collect(),
        stats,
        bounds,
        stopped,
    })
}
