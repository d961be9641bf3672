//! Resolution of configured stream fields to row positions.
//!
//! Runs once per worker before the first row. Any miss is fatal: the
//! engine never guesses a column.

use crate::config::DimensionConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::row::Schema;

/// Positions of the configured stream fields in the input schema.
#[derive(Debug, Clone)]
pub struct FieldIndexes {
    /// One index per natural-key mapping, in configuration order.
    pub keys: Vec<usize>,
    /// Index of the event-date field, if one is configured.
    pub date: Option<usize>,
    /// One entry per tracked field; `None` for audit policies, which
    /// take no stream value.
    pub tracked: Vec<Option<usize>>,
}

impl FieldIndexes {
    pub fn resolve(config: &DimensionConfig, schema: &Schema) -> ConfigResult<Self> {
        let mut keys = Vec::with_capacity(config.keys.len());
        for key in &config.keys {
            let index = schema
                .index_of(&key.stream)
                .ok_or_else(|| ConfigError::KeyFieldNotFound(key.stream.clone()))?;
            keys.push(index);
        }

        let date = match &config.date_field {
            None => None,
            Some(field) => Some(
                schema
                    .index_of(field)
                    .ok_or_else(|| ConfigError::DateFieldNotFound(field.clone()))?,
            ),
        };

        let mut tracked = Vec::with_capacity(config.tracked_fields().len());
        for field in config.tracked_fields() {
            if !field.policy.takes_stream_value() {
                tracked.push(None);
                continue;
            }
            // Presence of the stream name is enforced by validation.
            let stream = field.stream.as_deref().unwrap_or("");
            let index = schema
                .index_of(stream)
                .ok_or_else(|| ConfigError::StreamFieldNotFound(stream.to_string()))?;
            tracked.push(Some(index));
        }

        Ok(Self { keys, date, tracked })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::example_config;
    use crate::row::ValueType;

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

    #[test]
    fn test_resolves_all_positions() {
        let indexes = FieldIndexes::resolve(&example_config(), &input_schema()).unwrap();
        assert_eq!(indexes.keys, vec![0]);
        assert_eq!(indexes.date, Some(1));
        assert_eq!(indexes.tracked, vec![Some(2), Some(3)]);
    }

    #[test]
    fn test_missing_key_field_is_fatal() {
        let schema = Schema::from_headers(vec!["event_date", "email"], &|_| ValueType::Text);
        let err = FieldIndexes::resolve(&example_config(), &schema).unwrap_err();
        assert!(matches!(err, ConfigError::KeyFieldNotFound(f) if f == "customer_id"));
    }

    #[test]
    fn test_missing_date_field_is_fatal() {
        let schema = Schema::from_headers(vec!["customer_id", "email", "tier"], &|_| {
            ValueType::Text
        });
        let err = FieldIndexes::resolve(&example_config(), &schema).unwrap_err();
        assert!(matches!(err, ConfigError::DateFieldNotFound(_)));
    }

    #[test]
    fn test_no_date_field_configured() {
        let mut config = example_config();
        config.date_field = None;
        let schema = Schema::from_headers(vec!["customer_id", "email", "tier"], &|_| {
            ValueType::Text
        });
        let indexes = FieldIndexes::resolve(&config, &schema).unwrap();
        assert_eq!(indexes.date, None);
    }
}
