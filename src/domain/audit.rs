//! Audit records emitted around trigger activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single entry in the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,

    pub timestamp: DateTime<Utc>,

    /// Subsystem, e.g. "trigger" or "flowLogic"
    pub category: String,

    /// What happened, e.g. "auto_disable"
    pub event: String,

    /// Free-form detail (NO secrets)
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl AuditRecord {
    pub fn new(category: impl Into<String>, event: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category: category.into(),
            event: event.into(),
            fields,
        }
    }

    /// Look up a string field
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Build a field map from `(name, value)` pairs
pub fn audit_fields<I, K>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
