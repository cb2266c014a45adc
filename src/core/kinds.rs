//! Trigger kinds and their registry.
//!
//! Each kind supplies the `check` behavior for triggers whose `kind` field
//! names it. New kinds are added by registering them, not by changing the
//! trigger record.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::domain::{CheckResult, Trigger};

/// Check behavior for one kind of trigger
#[async_trait]
pub trait TriggerKind: Send + Sync {
    /// Identifier stored in `Trigger::kind`
    fn id(&self) -> &str;

    /// Decide whether the trigger fired and with which events
    async fn check(&self, trigger: &Trigger) -> Result<CheckResult>;
}

/// Emits a single `{"tick": true}` event on every check
#[derive(Debug, Clone, Copy, Default)]
pub struct TickKind;

#[async_trait]
impl TriggerKind for TickKind {
    fn id(&self) -> &str {
        "tick"
    }

    async fn check(&self, _trigger: &Trigger) -> Result<CheckResult> {
        Ok(CheckResult {
            events: vec![json!({ "tick": true })],
            ..Default::default()
        })
    }
}

/// Emits whatever `events`, `var` and `plugin` the trigger config holds
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticKind;

#[async_trait]
impl TriggerKind for StaticKind {
    fn id(&self) -> &str {
        "static"
    }

    async fn check(&self, trigger: &Trigger) -> Result<CheckResult> {
        if trigger.config.is_null() {
            return Ok(CheckResult::default());
        }

        serde_json::from_value(trigger.config.clone())
            .with_context(|| format!("Invalid static trigger config for '{}'", trigger.name))
    }
}

/// Registry of kinds keyed by identifier
#[derive(Default, Clone)]
pub struct KindRegistry {
    kinds: HashMap<String, Arc<dyn TriggerKind>>,
}

impl KindRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in kinds
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TickKind));
        registry.register(Arc::new(StaticKind));
        registry
    }

    /// Add or replace a kind
    pub fn register(&mut self, kind: Arc<dyn TriggerKind>) {
        self.kinds.insert(kind.id().to_string(), kind);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn TriggerKind>> {
        self.kinds.get(id).cloned()
    }

    /// Registered identifiers, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.kinds.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindRegistry").field("kinds", &self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tick_kind_emits_one_event() {
        let trigger = Trigger::new("t", "tick");
        let result = TickKind.check(&trigger).await.unwrap();

        assert_eq!(result.events, vec![json!({ "tick": true })]);
        assert!(result.var.is_empty());
    }

    #[tokio::test]
    async fn test_static_kind_reads_config() {
        let mut trigger = Trigger::new("t", "static");
        trigger.config = json!({
            "events": [{ "n": 1 }, { "n": 2 }],
            "var": { "source": "static" }
        });

        let result = StaticKind.check(&trigger).await.unwrap();
        assert_eq!(result.events.len(), 2);
        assert_eq!(result.var["source"], json!("static"));

        trigger.config = json!({ "events": "not a list" });
        assert!(StaticKind.check(&trigger).await.is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = KindRegistry::with_builtins();
        assert_eq!(registry.ids(), vec!["static".to_string(), "tick".to_string()]);
        assert!(registry.get("tick").is_some());
        assert!(registry.get("webhook").is_none());
    }
}
