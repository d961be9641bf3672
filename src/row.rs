//! Row and value model for the dimension pipeline.
//!
//! Rows are ordered sequences of typed values against a [`Schema`] that is
//! resolved once at the start of a run and fixed afterwards. The tagged
//! [`Value`] union replaces any dynamically typed container: every field
//! declares its type up front and coercion happens exactly once, when a
//! raw input cell is bound to the schema.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{CsvError, CsvResult};

/// Storage format for date values, both on output rows and in the
/// dimension table. Fixed-width so that lexicographic comparison in SQL
/// matches chronological order.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// =============================================================================
// Value Types
// =============================================================================

/// Declared type of a stream field or dimension column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Text,
    Integer,
    Number,
    Boolean,
    Date,
}

impl ValueType {
    /// Human-readable name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Text => "text",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Date => "date",
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A single dynamically carried, statically tagged value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    Date(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Parse a date from its text form.
    ///
    /// Accepts the canonical `YYYY-MM-DD HH:MM:SS` format (with optional
    /// fractional seconds), a bare `YYYY-MM-DD`, and `DD/MM/YYYY`.
    pub fn parse_date(s: &str) -> Option<NaiveDateTime> {
        let s = s.trim();
        if let Ok(d) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(d);
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return d.and_hms_opt(0, 0, 0);
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, "%d/%m/%Y") {
            return d.and_hms_opt(0, 0, 0);
        }
        None
    }

    /// Coerce a raw input cell to `vtype`. Empty cells become `Null`.
    pub fn coerce(raw: &str, vtype: ValueType) -> Option<Value> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Some(Value::Null);
        }
        match vtype {
            ValueType::Text => Some(Value::Text(raw.to_string())),
            ValueType::Integer => raw.parse::<i64>().ok().map(Value::Integer),
            ValueType::Number => raw.parse::<f64>().ok().map(Value::Number),
            ValueType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(Value::Boolean(true)),
                "false" | "f" | "no" | "n" | "0" => Some(Value::Boolean(false)),
                _ => None,
            },
            ValueType::Date => Value::parse_date(raw).map(Value::Date),
        }
    }

    /// Compare two values for the change detection in the decision engine.
    ///
    /// Nulls compare equal to each other and below everything else;
    /// integers and numbers compare numerically across the two variants;
    /// anything else falls back to comparing text forms.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Integer(a), Value::Number(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Number(a), Value::Integer(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
            }
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.to_string().cmp(&other.to_string()),
        }
    }

    /// True when the two values carry the same content.
    pub fn same(&self, other: &Value) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
    }
}

// =============================================================================
// Schema & Row
// =============================================================================

/// One ordered row of values. Positions follow the [`Schema`].
pub type Row = Vec<Value>;

/// A named, typed field of the run schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub vtype: ValueType,
}

/// The ordered field layout of a run, fixed after the header is read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Build a schema from header names, looking up declared types and
    /// defaulting the rest to text.
    pub fn from_headers<'a, I>(headers: I, types: &dyn Fn(&str) -> ValueType) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let fields = headers
            .into_iter()
            .map(|name| Field {
                name: name.to_string(),
                vtype: types(name),
            })
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Positional index of a named field, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn push(&mut self, name: impl Into<String>, vtype: ValueType) {
        self.fields.push(Field {
            name: name.into(),
            vtype,
        });
    }

    /// Coerce one raw record to a typed row against this schema.
    ///
    /// Short records are padded with nulls; extra cells are ignored.
    pub fn coerce_record(&self, cells: &[String], line: usize) -> CsvResult<Row> {
        let mut row = Vec::with_capacity(self.fields.len());
        for (i, field) in self.fields.iter().enumerate() {
            let raw = cells.get(i).map(String::as_str).unwrap_or("");
            match Value::coerce(raw, field.vtype) {
                Some(v) => row.push(v),
                None => {
                    return Err(CsvError::BadCell {
                        line,
                        column: field.name.clone(),
                        value: raw.to_string(),
                        expected: field.vtype.name(),
                    })
                }
            }
        }
        Ok(row)
    }
}

// =============================================================================
// Stream Contracts
// =============================================================================

/// Source of input rows. The schema is fixed before the first row.
pub trait RowStream {
    fn schema(&self) -> &Schema;

    /// Next row, or `None` at end of input.
    fn next_row(&mut self) -> CsvResult<Option<Row>>;
}

/// Receiver for augmented output rows.
pub trait RowSink {
    fn emit(&mut self, row: Row);
}

impl RowSink for Vec<Row> {
    fn emit(&mut self, row: Row) {
        self.push(row);
    }
}

/// In-memory row source, mainly for tests and library callers that
/// already hold their rows.
#[derive(Debug, Clone)]
pub struct MemoryRows {
    schema: Schema,
    rows: std::collections::VecDeque<Row>,
}

impl MemoryRows {
    pub fn new(schema: Schema, rows: Vec<Row>) -> Self {
        Self {
            schema,
            rows: rows.into(),
        }
    }
}

impl RowStream for MemoryRows {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_row(&mut self) -> CsvResult<Option<Row>> {
        Ok(self.rows.pop_front())
    }
}
