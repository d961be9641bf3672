//! Version lookup for a natural key at an event date.
//!
//! One prepared statement shape per run: the natural-key equality
//! predicates plus the half-open validity window test, with the event
//! date bound on both sides. A small per-worker cache short-circuits the
//! query for keys seen recently; entries are only trusted when their
//! validity window still covers the event date.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::config::{DimensionConfig, Mode};
use crate::db::Database;
use crate::engine::DimensionRow;
use crate::error::DbResult;
use crate::row::{Value, ValueType};

/// Cache fingerprint of a natural key: the display forms of the key
/// values joined by an unprintable separator.
pub fn fingerprint(key_values: &[Value]) -> String {
    let parts: Vec<String> = key_values.iter().map(|v| v.to_string()).collect();
    parts.join("\u{1}")
}

struct Cache {
    map: HashMap<String, DimensionRow>,
    /// 0 means unbounded.
    capacity: usize,
}

impl Cache {
    /// Drop the entries with the smallest surrogate keys once over
    /// capacity; those belong to the oldest dimension rows.
    fn evict(&mut self) {
        if self.capacity == 0 || self.map.len() <= self.capacity {
            return;
        }
        let mut by_key: Vec<(String, i64)> = self
            .map
            .iter()
            .map(|(k, row)| (k.clone(), row.surrogate_key))
            .collect();
        by_key.sort_by_key(|(_, tk)| *tk);
        let excess = self.map.len() - self.capacity + self.capacity / 10;
        for (k, _) in by_key.into_iter().take(excess) {
            self.map.remove(&k);
        }
    }
}

/// Resolves the dimension version active for a natural key at a date.
pub struct LookupResolver {
    sql: String,
    select_types: Vec<ValueType>,
    /// Maps each configured value slot to its position in the select
    /// list; `None` slots (audit columns) decode as null.
    value_slots: Vec<Option<usize>>,
    min_date: NaiveDateTime,
    max_date: NaiveDateTime,
    cache: Option<Cache>,
}

impl LookupResolver {
    pub fn new(config: &DimensionConfig) -> Self {
        // Value columns depend on the mode: compared columns for
        // maintenance, returned columns for lookup.
        let mut value_columns: Vec<(String, ValueType)> = Vec::new();
        let mut value_slots = Vec::new();
        match &config.mode {
            Mode::Maintenance { fields } => {
                for field in fields {
                    if field.policy.takes_stream_value() {
                        let stream = field.stream.as_deref().unwrap_or("");
                        value_slots.push(Some(value_columns.len()));
                        value_columns.push((field.column.clone(), config.field_type(stream)));
                    } else {
                        value_slots.push(None);
                    }
                }
            }
            Mode::Lookup { returns } => {
                for ret in returns {
                    value_slots.push(Some(value_columns.len()));
                    value_columns.push((ret.column.clone(), ret.value_type));
                }
            }
        }

        let mut select = vec![config.key_column.clone(), config.version_column.clone()];
        let mut select_types = vec![ValueType::Integer, ValueType::Integer];
        for (column, vtype) in &value_columns {
            select.push(column.clone());
            select_types.push(*vtype);
        }
        select.push(config.date_from_column.clone());
        select.push(config.date_to_column.clone());
        select_types.push(ValueType::Date);
        select_types.push(ValueType::Date);

        let mut predicates: Vec<String> =
            config.keys.iter().map(|k| format!("{} = ?", k.column)).collect();
        predicates.push(format!("? >= {}", config.date_from_column));
        predicates.push(format!("? < {}", config.date_to_column));

        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            select.join(", "),
            config.table,
            predicates.join(" AND ")
        );

        let cache = if config.cache_size < 0 {
            None
        } else {
            Some(Cache {
                map: HashMap::new(),
                capacity: config.cache_size as usize,
            })
        };

        Self {
            sql,
            select_types,
            value_slots,
            min_date: config.min_date(),
            max_date: config.max_date(),
            cache,
        }
    }

    /// Find the version active at `event_date` for the given key.
    pub fn find(
        &mut self,
        db: &mut dyn Database,
        key_values: &[Value],
        event_date: NaiveDateTime,
    ) -> DbResult<Option<DimensionRow>> {
        let print = fingerprint(key_values);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.map.get(&print) {
                if hit.covers(event_date) {
                    return Ok(Some(hit.clone()));
                }
            }
        }

        let mut params: Vec<Value> = key_values.to_vec();
        params.push(Value::Date(event_date));
        params.push(Value::Date(event_date));

        let raw = match db.query_one(&self.sql, &params, &self.select_types)? {
            None => return Ok(None),
            Some(raw) => raw,
        };

        let n = raw.len();
        let values = self
            .value_slots
            .iter()
            .map(|slot| match slot {
                Some(i) => raw[2 + i].clone(),
                None => Value::Null,
            })
            .collect();
        let row = DimensionRow {
            surrogate_key: raw[0].as_i64().unwrap_or_default(),
            version: raw[1].as_i64().unwrap_or(1),
            values,
            valid_from: raw[n - 2].as_date().unwrap_or(self.min_date),
            valid_to: raw[n - 1].as_date().unwrap_or(self.max_date),
        };
        self.store(key_values, row.clone());
        Ok(Some(row))
    }

    /// Remember (or replace) the cached current version for a key. The
    /// worker calls this after every write so replays hit the cache.
    pub fn store(&mut self, key_values: &[Value], row: DimensionRow) {
        if let Some(cache) = &mut self.cache {
            cache.map.insert(fingerprint(key_values), row);
            cache.evict();
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_len(&self) -> usize {
        self.cache.as_ref().map(|c| c.map.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }
}
