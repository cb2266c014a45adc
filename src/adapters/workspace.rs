//! File-backed conduct resolver.
//!
//! Conduct definitions live in a single YAML workspace file:
//!
//! ```yaml
//! conducts:
//!   - id: c1
//!     name: Nightly report
//!     enabled: true
//!     flow:
//!       - flowID: start
//!         triggerID: 3f2a...
//!         next: [notify]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ConductRef, ConductResolver, ConductRunner, ConductUsage};
use crate::domain::{ConductDefinition, ExecutionContext};

/// Parsed workspace file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(default)]
    pub conducts: Vec<ConductDefinition>,
}

impl Workspace {
    /// Load a workspace; a missing file is an empty workspace
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workspace file: {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse workspace file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize workspace")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write workspace file: {}", path.display()))
    }

    pub fn conduct_mut(&mut self, conduct_id: &str) -> Option<&mut ConductDefinition> {
        self.conducts.iter_mut().find(|c| c.id == conduct_id)
    }
}

/// Resolves conducts from a workspace file and binds them to one runner
pub struct WorkspaceResolver {
    path: PathBuf,
    runner: Arc<dyn ConductRunner>,
}

impl WorkspaceResolver {
    pub fn new(path: PathBuf, runner: Arc<dyn ConductRunner>) -> Self {
        Self { path, runner }
    }
}

#[async_trait]
impl ConductResolver for WorkspaceResolver {
    async fn enabled_conducts(&self, trigger_id: &str) -> Result<Vec<ConductRef>> {
        let workspace = Workspace::load(&self.path)?;

        let conducts: Vec<ConductRef> = workspace
            .conducts
            .into_iter()
            .filter(|c| c.enabled && c.references_trigger(trigger_id))
            .map(|c| ConductRef {
                id: c.id,
                name: c.name,
                runner: Arc::clone(&self.runner),
            })
            .collect();

        debug!(trigger_id, count = conducts.len(), "Resolved conducts");
        Ok(conducts)
    }

    async fn where_used(&self, trigger_id: &str) -> Result<Vec<ConductUsage>> {
        let workspace = Workspace::load(&self.path)?;

        Ok(workspace
            .conducts
            .iter()
            .filter(|c| c.references_trigger(trigger_id))
            .map(|c| ConductUsage {
                conduct_id: c.id.clone(),
                conduct_name: c.name.clone(),
            })
            .collect())
    }
}

/// Runner that only logs invocations
///
/// Stands in for the graph engine when conductor runs on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRunner;

#[async_trait]
impl ConductRunner for TracingRunner {
    async fn run_one(&self, trigger_id: &str, context: ExecutionContext, sync: bool) -> Result<()> {
        info!(
            trigger_id,
            conduct_id = context.flow.conduct_id.as_deref().unwrap_or_default(),
            stats = ?context.stats(),
            sync,
            "Conduct invoked"
        );
        Ok(())
    }

    async fn run_batch(
        &self,
        trigger_id: &str,
        contexts: Vec<ExecutionContext>,
        sync: bool,
    ) -> Result<()> {
        let conduct_id = contexts
            .first()
            .and_then(|c| c.flow.conduct_id.clone())
            .unwrap_or_default();
        info!(trigger_id, %conduct_id, size = contexts.len(), sync, "Conduct batch invoked");
        Ok(())
    }
}
