//! Domain types for the dispatch engine.
//!
//! This module contains the core data structures:
//! - Trigger: Persisted trigger record and lifecycle state
//! - ExecutionContext: Layered data handed to conduct runs
//! - Flow: Conduct definitions and transition entries
//! - Audit: Audit log records

pub mod audit;
pub mod context;
pub mod flow;
pub mod trigger;

// Re-export commonly used types
pub use audit::{audit_fields, AuditRecord};
pub use context::{ContextSeed, EventData, EventStats, ExecutionContext, FlowData, PersistentData};
pub use flow::{ConductDefinition, FlowError, FlowLink, FlowLogic, FlowNode, FlowTransition};
pub use trigger::{
    fields, AttributeChange, CheckResult, Trigger, TriggerError, TriggerSnapshot, TriggerState,
    DEFAULT_MAX_DURATION,
};
