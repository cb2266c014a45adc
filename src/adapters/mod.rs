//! Interfaces to the collaborators around the dispatch core.
//!
//! The dispatcher only talks to these traits. Default implementations
//! backed by local files live in the submodules.

pub mod audit;
pub mod schedule;
pub mod workspace;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{ExecutionContext, Trigger};

pub use audit::{JsonlAuditSink, MemoryAuditSink};
pub use schedule::{IntervalScheduler, ScheduleError};
pub use workspace::{TracingRunner, WorkspaceResolver};

/// Runs a conduct's graph for one or more event contexts
#[async_trait]
pub trait ConductRunner: Send + Sync {
    /// Run the conduct for a single event context
    async fn run_one(&self, trigger_id: &str, context: ExecutionContext, sync: bool) -> Result<()>;

    /// Run the conduct for an ordered slice of event contexts
    async fn run_batch(
        &self,
        trigger_id: &str,
        contexts: Vec<ExecutionContext>,
        sync: bool,
    ) -> Result<()>;
}

/// A conduct as resolved for dispatch
#[derive(Clone)]
pub struct ConductRef {
    pub id: String,
    pub name: String,
    pub runner: Arc<dyn ConductRunner>,
}

impl std::fmt::Debug for ConductRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConductRef")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Reverse-lookup entry: a conduct referencing a trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConductUsage {
    #[serde(rename = "conductID")]
    pub conduct_id: String,
    #[serde(rename = "conductName")]
    pub conduct_name: String,
}

/// Finds conducts whose flow graph references a trigger
#[async_trait]
pub trait ConductResolver: Send + Sync {
    /// Enabled conducts fed by the trigger
    async fn enabled_conducts(&self, trigger_id: &str) -> Result<Vec<ConductRef>>;

    /// Every conduct fed by the trigger, enabled or not
    async fn where_used(&self, trigger_id: &str) -> Result<Vec<ConductUsage>>;
}

/// Computes the next check time from a schedule spec
pub trait ScheduleCalculator: Send + Sync {
    /// Absolute epoch seconds of the next check
    fn next_epoch(&self, schedule: &str, now: f64) -> Result<i64>;
}

/// Fire-and-forget audit log
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an audit entry; failures must not reach the caller
    async fn record(&self, category: &str, event: &str, fields: Map<String, Value>);
}

/// Partial-field persistence of trigger records
#[async_trait]
pub trait TriggerPersistence: Send + Sync {
    /// Persist only the named fields of `trigger`
    async fn update(&self, trigger: &Trigger, fields: &[&str]) -> Result<()>;
}

/// Source of the current time in epoch seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }
}
