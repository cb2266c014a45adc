//! Layered execution context passed into conduct runs.
//!
//! Every fan-out (per conduct, then per event) produces an owned copy, so
//! concurrent runs never observe each other's mutations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::trigger::TriggerSnapshot;

/// Data carried across the whole dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentData {
    /// Identity of the firing trigger
    pub trigger: TriggerSnapshot,

    /// Variables produced by the trigger check
    #[serde(default)]
    pub var: Map<String, Value>,

    /// Plugin scratch space produced by the trigger check
    #[serde(default)]
    pub plugin: Map<String, Value>,
}

/// Flow-scoped identifiers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowData {
    pub trigger_id: String,
    pub trigger_name: String,
    pub conduct_id: Option<String>,
    pub conduct_name: Option<String>,
}

/// Position of an event within its dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub first: bool,
    pub current: usize,
    pub total: usize,
    pub last: bool,
}

impl EventStats {
    pub fn new(index: usize, total: usize) -> Self {
        Self {
            first: index == 0,
            current: index,
            total,
            last: index + 1 == total,
        }
    }
}

/// The event being processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub event: Value,
    pub stats: EventStats,
}

/// Seed data produced by a trigger check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSeed {
    #[serde(default)]
    pub var: Map<String, Value>,
    #[serde(default)]
    pub plugin: Map<String, Value>,
}

impl ContextSeed {
    pub fn is_empty(&self) -> bool {
        self.var.is_empty() && self.plugin.is_empty()
    }
}

/// Execution context for one conduct invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub persistent: PersistentData,
    pub flow: FlowData,
    pub event: Option<EventData>,
}

impl ExecutionContext {
    /// Base context for a dispatch
    pub fn new(trigger: TriggerSnapshot, seed: Option<ContextSeed>) -> Self {
        let seed = seed.unwrap_or_default();
        let flow = FlowData {
            trigger_id: trigger.id.clone(),
            trigger_name: trigger.name.clone(),
            conduct_id: None,
            conduct_name: None,
        };

        Self {
            persistent: PersistentData {
                trigger,
                var: seed.var,
                plugin: seed.plugin,
            },
            flow,
            event: None,
        }
    }

    /// Copy stamped with a conduct's identity
    pub fn for_conduct(&self, conduct_id: &str, conduct_name: &str) -> Self {
        let mut copy = self.clone();
        copy.flow.conduct_id = Some(conduct_id.to_string());
        copy.flow.conduct_name = Some(conduct_name.to_string());
        copy
    }

    /// Copy stamped with one event and its position
    pub fn for_event(&self, event: &Value, index: usize, total: usize) -> Self {
        let mut copy = self.clone();
        copy.event = Some(EventData {
            event: event.clone(),
            stats: EventStats::new(index, total),
        });
        copy
    }

    pub fn stats(&self) -> Option<EventStats> {
        self.event.as_ref().map(|e| e.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Trigger;
    use serde_json::json;

    fn base() -> ExecutionContext {
        let trigger = Trigger::new("nightly", "tick");
        let mut seed = ContextSeed::default();
        seed.var.insert("count".to_string(), json!(1));
        ExecutionContext::new(trigger.snapshot(), Some(seed))
    }

    #[test]
    fn test_event_stats_positions() {
        let only = EventStats::new(0, 1);
        assert!(only.first && only.last);

        let middle = EventStats::new(1, 3);
        assert!(!middle.first && !middle.last);
        assert_eq!(middle.current, 1);
        assert_eq!(middle.total, 3);

        assert!(EventStats::new(2, 3).last);
    }

    #[test]
    fn test_copies_are_independent() {
        let ctx = base();
        let conduct_a = ctx.for_conduct("a", "A");
        let conduct_b = ctx.for_conduct("b", "B");

        let mut first = conduct_a.for_event(&json!({"n": 1}), 0, 2);
        let second = conduct_a.for_event(&json!({"n": 2}), 1, 2);

        first.persistent.var.insert("count".to_string(), json!(99));
        if let Some(event) = first.event.as_mut() {
            event.event["n"] = json!(100);
        }

        assert_eq!(second.persistent.var["count"], json!(1));
        assert_eq!(second.event.unwrap().event["n"], json!(2));
        assert_eq!(conduct_b.persistent.var["count"], json!(1));
        assert_eq!(conduct_b.flow.conduct_id.as_deref(), Some("b"));
        assert!(ctx.flow.conduct_id.is_none());
    }
}
