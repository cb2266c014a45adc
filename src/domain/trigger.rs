//! Trigger records and their lifecycle state.
//!
//! A Trigger is the persisted description of one configured condition
//! check: who it is, when it last ran, and how its conducts are dispatched.
//! Field names in the serialized form are part of the persistence contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Default run budget in seconds when `maxDuration` is 0
pub const DEFAULT_MAX_DURATION: u64 = 60;

/// Persisted field names used for partial updates
pub mod fields {
    pub const ENABLED: &str = "enabled";
    pub const START_CHECK: &str = "startCheck";
    pub const ATTEMPT_COUNT: &str = "attemptCount";
    pub const LAST_CHECK: &str = "lastCheck";
    pub const NEXT_CHECK: &str = "nextCheck";

    /// Fields written after a successful dispatch
    pub const BOOKKEEPING: [&str; 4] = [START_CHECK, LAST_CHECK, NEXT_CHECK, ATTEMPT_COUNT];
}

/// A configured trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    /// Unique identifier
    pub id: String,

    /// Human-readable name (defaults to the id)
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub comment: String,

    /// Owning system linkage
    #[serde(default, rename = "systemID")]
    pub system_id: i64,

    #[serde(default)]
    pub system_index: i64,

    /// Access-control descriptor (opaque)
    #[serde(default)]
    pub acl: Option<Value>,

    /// Trigger kind identifier, resolved through the kind registry
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Kind-specific configuration (opaque to the dispatcher)
    #[serde(default)]
    pub config: Value,

    /// Schedule spec consumed by the scheduling calculator
    #[serde(default)]
    pub schedule: String,

    /// Epoch seconds of the last completed run
    #[serde(default)]
    pub last_check: f64,

    /// Epoch seconds of the next scheduled check
    #[serde(default)]
    pub next_check: i64,

    /// 0 when idle, otherwise epoch seconds when the current run started
    #[serde(default)]
    pub start_check: f64,

    /// Wall-clock start of the current notify call (runtime only)
    #[serde(skip)]
    pub start_time: f64,

    /// Cluster member currently owning this trigger
    #[serde(default, rename = "workerID")]
    pub worker_id: String,

    #[serde(default)]
    pub enabled: bool,

    /// Run budget in seconds (0 means the default)
    #[serde(default = "default_max_duration")]
    pub max_duration: u64,

    /// 0 runs conducts inline, otherwise the max simultaneous invocations
    #[serde(default)]
    pub concurrency: usize,

    /// Reserved
    #[serde(default)]
    pub threaded: bool,

    #[serde(default = "default_true")]
    pub fail_on_action_failure: bool,

    /// Consecutive failed or incomplete runs
    #[serde(default)]
    pub attempt_count: u32,

    /// Attempts allowed before the poller gives up on this trigger
    #[serde(default = "default_auto_restart_count")]
    pub auto_restart_count: u32,

    #[serde(default)]
    pub execution_count: u64,

    #[serde(default)]
    pub scope: i64,
}

fn default_kind() -> String {
    "tick".to_string()
}
fn default_max_duration() -> u64 {
    DEFAULT_MAX_DURATION
}
fn default_true() -> bool {
    true
}
fn default_auto_restart_count() -> u32 {
    3
}

impl Trigger {
    /// Create a new trigger; an empty name falls back to the generated id
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let name = name.into();
        let name = if name.is_empty() { id.clone() } else { name };

        Self {
            id,
            name,
            comment: String::new(),
            system_id: 0,
            system_index: 0,
            acl: None,
            kind: kind.into(),
            config: Value::Null,
            schedule: String::new(),
            last_check: 0.0,
            next_check: 0,
            start_check: 0.0,
            start_time: 0.0,
            worker_id: String::new(),
            enabled: false,
            max_duration: DEFAULT_MAX_DURATION,
            concurrency: 0,
            threaded: false,
            fail_on_action_failure: true,
            attempt_count: 0,
            auto_restart_count: default_auto_restart_count(),
            execution_count: 0,
            scope: 0,
        }
    }

    /// Run budget in seconds, never 0
    pub fn effective_max_duration(&self, default: u64) -> u64 {
        if self.max_duration > 0 {
            self.max_duration
        } else if default > 0 {
            default
        } else {
            DEFAULT_MAX_DURATION
        }
    }

    /// Classify the trigger at `now`
    ///
    /// A running trigger with `maxDuration` 0 is judged against
    /// `default_max_duration`, the same budget dispatch applies.
    /// `freshness_window` marks an idle trigger overdue when its last
    /// completed run is older than the window.
    pub fn state(&self, now: f64, default_max_duration: u64, freshness_window: Option<f64>) -> TriggerState {
        if !self.enabled {
            return TriggerState::Disabled;
        }

        if self.start_check > 0.0 {
            let deadline = self.start_check + self.effective_max_duration(default_max_duration) as f64;
            return if now < deadline {
                TriggerState::Running
            } else {
                TriggerState::Overdue
            };
        }

        match freshness_window {
            Some(window) if self.last_check > 0.0 && now - self.last_check > window => {
                TriggerState::Overdue
            }
            _ => TriggerState::Pending,
        }
    }

    /// Mark the start of a check cycle (called by the poller)
    pub fn begin_check(&mut self, now: f64) {
        self.start_check = now;
        self.attempt_count += 1;
    }

    /// Whether the poller has used up its restart allowance
    pub fn restarts_exhausted(&self) -> bool {
        self.attempt_count >= self.auto_restart_count
    }

    /// Reset bookkeeping after a successful dispatch
    pub fn complete_check(&mut self, now: f64, next_check: i64) {
        self.start_check = 0.0;
        self.attempt_count = 0;
        self.last_check = now;
        self.next_check = next_check;
    }

    /// Drop a stuck `startCheck` marker; returns whether one was set
    pub fn clear_start_check(&mut self) -> bool {
        let was_set = self.start_check > 0.0;
        self.start_check = 0.0;
        was_set
    }

    /// Generic field setter keyed by the persisted field name
    ///
    /// Enabling a disabled trigger also clears `startCheck` and
    /// `attemptCount`; the caller is told so it can persist them.
    pub fn set_attribute(&mut self, name: &str, value: Value) -> Result<AttributeChange, TriggerError> {
        if name == "id" {
            return Err(TriggerError::ReadOnly(name.to_string()));
        }

        let was_enabled = self.enabled;
        let start_time = self.start_time;

        let mut doc = serde_json::to_value(&*self)?;
        let map = doc
            .as_object_mut()
            .ok_or_else(|| TriggerError::UnknownAttribute(name.to_string()))?;
        if !map.contains_key(name) {
            return Err(TriggerError::UnknownAttribute(name.to_string()));
        }
        map.insert(name.to_string(), value);

        let mut updated: Trigger = serde_json::from_value(doc).map_err(|e| TriggerError::InvalidValue {
            attribute: name.to_string(),
            reason: e.to_string(),
        })?;
        updated.start_time = start_time;
        *self = updated;

        if name == fields::ENABLED && self.enabled && !was_enabled {
            self.start_check = 0.0;
            self.attempt_count = 0;
            return Ok(AttributeChange::Reenabled);
        }

        Ok(AttributeChange::Set)
    }

    /// Read-only identity used inside execution contexts
    pub fn snapshot(&self) -> TriggerSnapshot {
        TriggerSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            schedule: self.schedule.clone(),
            max_duration: self.max_duration,
            concurrency: self.concurrency,
            fail_on_action_failure: self.fail_on_action_failure,
            scope: self.scope,
            start_time: self.start_time,
        }
    }
}

/// Lifecycle state derived from the bookkeeping fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Disabled,
    Pending,
    Running,
    /// Overran its budget or missed its freshness window
    Overdue,
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Overdue => "overdue",
        };
        f.pad(s)
    }
}

/// Outcome of `Trigger::set_attribute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeChange {
    Set,
    /// `enabled` went false -> true and run markers were cleared
    Reenabled,
}

/// Immutable trigger identity embedded in execution contexts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSnapshot {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub schedule: String,
    pub max_duration: u64,
    pub concurrency: usize,
    pub fail_on_action_failure: bool,
    pub scope: i64,
    pub start_time: f64,
}

/// Result payload of a trigger check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub var: serde_json::Map<String, Value>,
    #[serde(default)]
    pub plugin: serde_json::Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Unknown trigger attribute: {0}")]
    UnknownAttribute(String),

    #[error("Trigger attribute is read-only: {0}")]
    ReadOnly(String),

    #[error("Invalid value for '{attribute}': {reason}")]
    InvalidValue { attribute: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
