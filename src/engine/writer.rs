//! Write path of the maintenance mode.
//!
//! All statement shapes except the partial in-place update are fixed for
//! the whole run and built once at construction. The in-place update is
//! assembled per row because it only touches the columns that actually
//! changed.

use chrono::NaiveDateTime;

use crate::config::{DimensionConfig, TrackedField, UpdatePolicy};
use crate::db::Database;
use crate::error::{DbError, DbResult};
use crate::row::Value;

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Issues the insert / close / amend / punch-through statements for one
/// dimension table.
pub struct DimensionWriter {
    table: String,
    key_column: String,
    version_column: String,
    /// `k1 = ? AND k2 = ?` over the natural-key columns.
    key_predicates: String,
    fields: Vec<TrackedField>,
    /// Field indexes whose policy takes a stream value.
    comparing: Vec<usize>,
    /// Field indexes with the punch-through policy.
    punch: Vec<usize>,
    date_updated: Vec<String>,
    date_both: Vec<String>,
    last_version: Vec<String>,
    insert_sql: String,
    close_sql: String,
    punch_sql: Option<String>,
    auto_increment: bool,
}

impl DimensionWriter {
    pub fn new(config: &DimensionConfig, auto_increment: bool) -> Self {
        let fields: Vec<TrackedField> = config.tracked_fields().to_vec();

        let comparing: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.policy.takes_stream_value())
            .map(|(i, _)| i)
            .collect();
        let punch: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.policy == UpdatePolicy::Punchthrough)
            .map(|(i, _)| i)
            .collect();

        let audit = |policy: UpdatePolicy| -> Vec<String> {
            fields
                .iter()
                .filter(|f| f.policy == policy)
                .map(|f| f.column.clone())
                .collect()
        };
        let date_inserted = audit(UpdatePolicy::DateInserted);
        let date_updated = audit(UpdatePolicy::DateUpdated);
        let date_both = audit(UpdatePolicy::DateInsertedOrUpdated);
        let last_version = audit(UpdatePolicy::LastVersion);

        let key_predicates = config
            .keys
            .iter()
            .map(|k| format!("{} = ?", k.column))
            .collect::<Vec<_>>()
            .join(" AND ");

        // INSERT: surrogate key (unless the database assigns it),
        // version, validity window, natural keys, tracked values, then
        // the insert-time audit columns.
        let mut insert_cols: Vec<String> = Vec::new();
        if !auto_increment {
            insert_cols.push(config.key_column.clone());
        }
        insert_cols.push(config.version_column.clone());
        insert_cols.push(config.date_from_column.clone());
        insert_cols.push(config.date_to_column.clone());
        insert_cols.extend(config.keys.iter().map(|k| k.column.clone()));
        insert_cols.extend(comparing.iter().map(|&i| fields[i].column.clone()));
        insert_cols.extend(date_inserted.iter().cloned());
        insert_cols.extend(date_both.iter().cloned());
        insert_cols.extend(last_version.iter().cloned());
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            config.table,
            insert_cols.join(", "),
            vec!["?"; insert_cols.len()].join(", ")
        );

        // CLOSE: truncate the current version's validity window and mark
        // it superseded.
        let mut close_set = vec![format!("{} = ?", config.date_to_column)];
        close_set.extend(date_updated.iter().map(|c| format!("{} = ?", c)));
        close_set.extend(date_both.iter().map(|c| format!("{} = ?", c)));
        close_set.extend(last_version.iter().map(|c| format!("{} = ?", c)));
        let close_sql = format!(
            "UPDATE {} SET {} WHERE {} AND {} = ?",
            config.table,
            close_set.join(", "),
            key_predicates,
            config.version_column
        );

        // PUNCH: rewrite the punch-through columns across every version
        // of the key. No version predicate on purpose.
        let punch_sql = if punch.is_empty() {
            None
        } else {
            let mut set: Vec<String> = punch
                .iter()
                .map(|&i| format!("{} = ?", fields[i].column))
                .collect();
            set.extend(date_updated.iter().map(|c| format!("{} = ?", c)));
            set.extend(date_both.iter().map(|c| format!("{} = ?", c)));
            Some(format!(
                "UPDATE {} SET {} WHERE {}",
                config.table,
                set.join(", "),
                key_predicates
            ))
        };

        Self {
            table: config.table.clone(),
            key_column: config.key_column.clone(),
            version_column: config.version_column.clone(),
            key_predicates,
            fields,
            comparing,
            punch,
            date_updated,
            date_both,
            last_version,
            insert_sql,
            close_sql,
            punch_sql,
            auto_increment,
        }
    }

    /// Insert one version row and return its surrogate key.
    ///
    /// `surrogate` must be `Some` unless the database assigns keys on
    /// insert; `field_values` is parallel to the tracked fields.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_version(
        &self,
        db: &mut dyn Database,
        surrogate: Option<i64>,
        version: i64,
        valid_from: NaiveDateTime,
        valid_to: NaiveDateTime,
        key_values: &[Value],
        field_values: &[Value],
    ) -> DbResult<i64> {
        let stamp = now();
        let mut params: Vec<Value> = Vec::new();
        if !self.auto_increment {
            let key = surrogate.ok_or_else(|| DbError::NoGeneratedKey(self.table.clone()))?;
            params.push(Value::Integer(key));
        }
        params.push(Value::Integer(version));
        params.push(Value::Date(valid_from));
        params.push(Value::Date(valid_to));
        params.extend(key_values.iter().cloned());
        params.extend(self.comparing.iter().map(|&i| field_values[i].clone()));
        let date_inserted_count =
            self.fields.iter().filter(|f| f.policy == UpdatePolicy::DateInserted).count();
        params.extend(std::iter::repeat(Value::Date(stamp)).take(date_inserted_count));
        params.extend(std::iter::repeat(Value::Date(stamp)).take(self.date_both.len()));
        params.extend(std::iter::repeat(Value::Boolean(true)).take(self.last_version.len()));

        if self.auto_increment {
            db.insert_returning_key(&self.insert_sql, &params, &self.table)
        } else {
            db.execute(&self.insert_sql, &params)?;
            // Checked above.
            surrogate.ok_or_else(|| DbError::NoGeneratedKey(self.table.clone()))
        }
    }

    /// Close the current version at `new_valid_to` so the next version
    /// can start there without a gap.
    pub fn close_version(
        &self,
        db: &mut dyn Database,
        key_values: &[Value],
        version: i64,
        new_valid_to: NaiveDateTime,
    ) -> DbResult<()> {
        let stamp = now();
        let mut params: Vec<Value> = vec![Value::Date(new_valid_to)];
        params.extend(std::iter::repeat(Value::Date(stamp)).take(self.date_updated.len()));
        params.extend(std::iter::repeat(Value::Date(stamp)).take(self.date_both.len()));
        params.extend(std::iter::repeat(Value::Boolean(false)).take(self.last_version.len()));
        params.extend(key_values.iter().cloned());
        params.push(Value::Integer(version));
        db.execute(&self.close_sql, &params)?;
        Ok(())
    }

    /// Overwrite only the changed columns on the current version row.
    pub fn update_in_place(
        &self,
        db: &mut dyn Database,
        key_values: &[Value],
        version: i64,
        changed: &[usize],
        incoming: &[Value],
        event_date: NaiveDateTime,
    ) -> DbResult<()> {
        if changed.is_empty() {
            return Ok(());
        }
        let mut set: Vec<String> = changed
            .iter()
            .map(|&i| format!("{} = ?", self.fields[i].column))
            .collect();
        set.extend(self.date_updated.iter().map(|c| format!("{} = ?", c)));
        set.extend(self.date_both.iter().map(|c| format!("{} = ?", c)));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} AND {} = ?",
            self.table,
            set.join(", "),
            self.key_predicates,
            self.version_column
        );

        let mut params: Vec<Value> = changed.iter().map(|&i| incoming[i].clone()).collect();
        let stamps = self.date_updated.len() + self.date_both.len();
        params.extend(std::iter::repeat(Value::Date(event_date)).take(stamps));
        params.extend(key_values.iter().cloned());
        params.push(Value::Integer(version));
        db.execute(&sql, &params)?;
        Ok(())
    }

    /// Rewrite the punch-through columns on every version of the key.
    pub fn punch_through(
        &self,
        db: &mut dyn Database,
        key_values: &[Value],
        incoming: &[Value],
    ) -> DbResult<()> {
        let sql = match &self.punch_sql {
            None => return Ok(()),
            Some(sql) => sql,
        };
        let stamp = now();
        let mut params: Vec<Value> = self.punch.iter().map(|&i| incoming[i].clone()).collect();
        let stamps = self.date_updated.len() + self.date_both.len();
        params.extend(std::iter::repeat(Value::Date(stamp)).take(stamps));
        params.extend(key_values.iter().cloned());
        db.execute(sql, &params)?;
        Ok(())
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }
}
