//! File-based trigger persistence.
//!
//! Each trigger is one JSON document (`<id>.json`). Partial updates take an
//! exclusive lock on a sidecar `<id>.lock`, re-read the document and replace
//! only the named fields, so concurrent writers touching other fields are
//! not clobbered.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, warn};

use crate::adapters::TriggerPersistence;
use crate::domain::Trigger;

/// Directory of trigger documents
#[derive(Debug, Clone)]
pub struct FileTriggerStore {
    dir: PathBuf,
}

impl FileTriggerStore {
    /// Create or open a store rooted at `dir`
    pub async fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create triggers directory: {}", dir.display()))?;

        Ok(Self { dir })
    }

    /// Open the store in the configured home directory
    pub async fn open_default() -> Result<Self> {
        Self::open(crate::config::triggers_dir()?).await
    }

    fn document_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn lock_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{}.lock", id)))
    }

    /// Store a new trigger document
    pub async fn insert(&self, trigger: &Trigger) -> Result<()> {
        let path = self.document_path(&trigger.id)?;
        let lock_path = self.lock_path(&trigger.id)?;
        let doc = serde_json::to_value(trigger).context("Failed to serialize trigger")?;

        tokio::task::spawn_blocking(move || {
            with_lock(&lock_path, || {
                if path.exists() {
                    anyhow::bail!("Trigger already exists: {}", path.display());
                }
                write_document(&path, &doc)
            })
        })
        .await
        .context("Trigger insert task failed")??;

        debug!(trigger_id = %trigger.id, "Trigger stored");
        Ok(())
    }

    /// Load a trigger by id
    pub async fn load(&self, id: &str) -> Result<Trigger> {
        let path = self.document_path(id)?;

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Trigger not found: {}", id))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse trigger document: {}", path.display()))
    }

    /// Load every trigger, sorted by name
    pub async fn list(&self) -> Result<Vec<Trigger>> {
        let mut triggers = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let content = fs::read_to_string(&path).await?;
            let trigger: Trigger = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse trigger document: {}", path.display()))?;
            triggers.push(trigger);
        }

        triggers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(triggers)
    }

    /// Load a trigger by id or, failing that, by exact name
    pub async fn find(&self, id_or_name: &str) -> Result<Trigger> {
        if validate_id(id_or_name).is_ok() && self.dir.join(format!("{}.json", id_or_name)).exists() {
            return self.load(id_or_name).await;
        }

        self.list()
            .await?
            .into_iter()
            .find(|t| t.name == id_or_name)
            .with_context(|| format!("Trigger not found: {}", id_or_name))
    }
}

#[async_trait]
impl TriggerPersistence for FileTriggerStore {
    async fn update(&self, trigger: &Trigger, fields: &[&str]) -> Result<()> {
        let path = self.document_path(&trigger.id)?;
        let lock_path = self.lock_path(&trigger.id)?;
        let patch = field_patch(trigger, fields)?;

        tokio::task::spawn_blocking(move || {
            with_lock(&lock_path, || {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read trigger document: {}", path.display()))?;
                let mut doc: Value = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse trigger document: {}", path.display()))?;

                let object = doc
                    .as_object_mut()
                    .with_context(|| format!("Trigger document is not an object: {}", path.display()))?;
                object.extend(patch);

                write_document(&path, &doc)
            })
        })
        .await
        .context("Trigger update task failed")??;

        debug!(trigger_id = %trigger.id, ?fields, "Trigger fields persisted");
        Ok(())
    }
}

/// Select the named fields from the serialized trigger
fn field_patch(trigger: &Trigger, fields: &[&str]) -> Result<Map<String, Value>> {
    let doc = serde_json::to_value(trigger).context("Failed to serialize trigger")?;
    let object = doc.as_object().context("Trigger did not serialize to an object")?;

    fields
        .iter()
        .map(|name| {
            object
                .get(*name)
                .map(|value| (name.to_string(), value.clone()))
                .with_context(|| format!("Unknown trigger field: {}", name))
        })
        .collect()
}

fn with_lock<T>(lock_path: &Path, body: impl FnOnce() -> Result<T>) -> Result<T> {
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

    lock.lock_exclusive()
        .with_context(|| format!("Failed to acquire lock: {}", lock_path.display()))?;

    let result = body();
    if let Err(e) = lock.unlock() {
        warn!(error = %e, lock = %lock_path.display(), "Failed to release trigger lock");
    }
    result
}

fn write_document(path: &Path, doc: &Value) -> Result<()> {
    let json = serde_json::to_string_pretty(doc).context("Failed to serialize trigger document")?;
    let tmp = path.with_extension("json.tmp");

    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write trigger document: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace trigger document: {}", path.display()))?;

    Ok(())
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        anyhow::bail!("Invalid trigger id: {:?}", id);
    }
    Ok(())
}
