//! Mapping between the tracker's loosely typed fields and engine types.
//!
//! Trackers expose custom fields as plain `name -> value` pairs. Everything
//! that touches those names goes through a [`FieldSchema`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use super::assignment::AssignmentStatus;

/// Names of the tracker fields the engine reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field mirroring [`AssignmentStatus`].
    pub status_field: String,
    /// Field naming the instance working on the issue.
    pub instance_field: String,
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self {
            status_field: "status".to_string(),
            instance_field: "instance".to_string(),
        }
    }
}

/// Raw field values of one tracker record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerRecord {
    /// Issue the fields belong to.
    pub issue_number: u64,
    /// Field name to value; `None` for a field that exists but is empty.
    pub fields: BTreeMap<String, Option<String>>,
}

impl TrackerRecord {
    /// Record with no fields set.
    pub fn new(issue_number: u64) -> Self {
        Self {
            issue_number,
            fields: BTreeMap::new(),
        }
    }

    /// Set `name` to `value`.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), Some(value.into()));
        self
    }

    fn value(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_deref())
    }
}

/// Typed view of the fields the engine cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerFields {
    /// Decoded status, `None` when unset or unknown.
    pub status: Option<AssignmentStatus>,
    /// Instance id, `None` when unset.
    pub assigned_instance: Option<String>,
}

/// Field writes; a `None` value clears the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUpdate {
    /// Field name to new value.
    pub fields: BTreeMap<String, Option<String>>,
}

impl FieldUpdate {
    /// Nothing to write.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FieldSchema {
    /// Schema with custom field names.
    pub fn new(status_field: impl Into<String>, instance_field: impl Into<String>) -> Self {
        Self {
            status_field: status_field.into(),
            instance_field: instance_field.into(),
        }
    }

    /// Decode a record. Unknown status values decode to `None` with a warning.
    pub fn decode(&self, record: &TrackerRecord) -> TrackerFields {
        let status = record.value(&self.status_field).and_then(|raw| {
            let parsed = AssignmentStatus::from_str(raw);
            if parsed.is_none() {
                warn!(
                    issue_number = record.issue_number,
                    field = %self.status_field,
                    value = raw,
                    "unrecognised status value in tracker"
                );
            }
            parsed
        });
        TrackerFields {
            status,
            assigned_instance: record.value(&self.instance_field).map(str::to_string),
        }
    }

    /// Build the write that mirrors a status and instance to the tracker.
    ///
    /// `status_label` is written verbatim so a configured rejection label can
    /// stand in for `assigned`.
    pub fn encode(&self, status_label: &str, instance: Option<&str>) -> FieldUpdate {
        let mut fields = BTreeMap::new();
        fields.insert(self.status_field.clone(), Some(status_label.to_string()));
        fields.insert(self.instance_field.clone(), instance.map(str::to_string));
        FieldUpdate { fields }
    }
}
