//! Change detection between an incoming row and the stored version.
//!
//! Pure functions only; nothing here touches the database. The outcome
//! of a comparison is one version action plus an orthogonal punch-through
//! flag, since punch-through columns rewrite history regardless of what
//! the versioned columns decided.

use crate::config::{TrackedField, UpdatePolicy};
use crate::row::Value;

/// What happens to the version timeline for this row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionAction {
    /// Every compared column matched; nothing is written.
    NoChange,
    /// Only overwrite-in-place columns changed; the current version row
    /// is amended, no new version appears.
    UpdateInPlace,
    /// At least one versioned column changed; the current version is
    /// closed and a new one inserted.
    InsertNewVersion,
}

/// Outcome of comparing one incoming row against the stored version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: VersionAction,
    /// True when a punch-through column changed; applied across all
    /// versions of the key, whatever `action` says.
    pub punch_through: bool,
    /// Indexes (into the tracked-field list) of the comparing columns
    /// that changed. Drives the partial update statement.
    pub changed: Vec<usize>,
}

impl Decision {
    pub fn is_no_op(&self) -> bool {
        self.action == VersionAction::NoChange && !self.punch_through
    }
}

/// Compare the incoming values against the stored version.
///
/// `incoming` and `existing` are parallel to `fields`; audit-policy
/// positions are skipped. A versioned change dominates: when both an
/// `Insert` and an `Update` column changed, the row takes the new-version
/// path and the in-place columns ride along on the inserted row.
pub fn decide(fields: &[TrackedField], incoming: &[Value], existing: &[Value]) -> Decision {
    let mut insert = false;
    let mut update = false;
    let mut punch = false;
    let mut changed = Vec::new();

    for (i, field) in fields.iter().enumerate() {
        if !field.policy.takes_stream_value() {
            continue;
        }
        if incoming[i].same(&existing[i]) {
            continue;
        }
        changed.push(i);
        match field.policy {
            UpdatePolicy::Insert => insert = true,
            UpdatePolicy::Update => update = true,
            UpdatePolicy::Punchthrough => punch = true,
            _ => {}
        }
    }

    let action = if insert {
        VersionAction::InsertNewVersion
    } else if update {
        VersionAction::UpdateInPlace
    } else {
        VersionAction::NoChange
    };

    Decision {
        action,
        punch_through: punch,
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<TrackedField> {
        vec![
            TrackedField {
                stream: Some("email".into()),
                column: "email".into(),
                policy: UpdatePolicy::Update,
            },
            TrackedField {
                stream: Some("tier".into()),
                column: "tier".into(),
                policy: UpdatePolicy::Insert,
            },
            TrackedField {
                stream: Some("region".into()),
                column: "region".into(),
                policy: UpdatePolicy::Punchthrough,
            },
            TrackedField {
                stream: None,
                column: "last_version".into(),
                policy: UpdatePolicy::LastVersion,
            },
        ]
    }

    fn row(email: &str, tier: &str, region: &str) -> Vec<Value> {
        vec![
            Value::Text(email.into()),
            Value::Text(tier.into()),
            Value::Text(region.into()),
            Value::Null,
        ]
    }

    #[test]
    fn test_identical_rows_are_a_no_op() {
        let d = decide(&fields(), &row("a@x", "gold", "eu"), &row("a@x", "gold", "eu"));
        assert!(d.is_no_op());
        assert!(d.changed.is_empty());
    }

    #[test]
    fn test_update_column_changes_in_place() {
        let d = decide(&fields(), &row("b@x", "gold", "eu"), &row("a@x", "gold", "eu"));
        assert_eq!(d.action, VersionAction::UpdateInPlace);
        assert!(!d.punch_through);
        assert_eq!(d.changed, vec![0]);
    }

    #[test]
    fn test_insert_column_creates_new_version() {
        let d = decide(&fields(), &row("a@x", "silver", "eu"), &row("a@x", "gold", "eu"));
        assert_eq!(d.action, VersionAction::InsertNewVersion);
        assert!(!d.punch_through);
    }

    #[test]
    fn test_insert_dominates_update() {
        let d = decide(&fields(), &row("b@x", "silver", "eu"), &row("a@x", "gold", "eu"));
        assert_eq!(d.action, VersionAction::InsertNewVersion);
        assert_eq!(d.changed, vec![0, 1]);
    }

    #[test]
    fn test_punch_through_alone_keeps_timeline() {
        let d = decide(&fields(), &row("a@x", "gold", "us"), &row("a@x", "gold", "eu"));
        assert_eq!(d.action, VersionAction::NoChange);
        assert!(d.punch_through);
        assert!(!d.is_no_op());
    }

    #[test]
    fn test_punch_through_rides_along_with_insert() {
        let d = decide(&fields(), &row("a@x", "silver", "us"), &row("a@x", "gold", "eu"));
        assert_eq!(d.action, VersionAction::InsertNewVersion);
        assert!(d.punch_through);
    }

    #[test]
    fn test_null_to_value_is_a_change() {
        let mut stored = row("a@x", "gold", "eu");
        stored[0] = Value::Null;
        let d = decide(&fields(), &row("a@x", "gold", "eu"), &stored);
        assert_eq!(d.action, VersionAction::UpdateInPlace);
    }
}
