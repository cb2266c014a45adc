//! Compute-once lookup cache with named namespaces.
//!
//! Each key holds an async once-cell: the first caller computes the value,
//! concurrent callers for the same key wait on that computation instead of
//! repeating it. A failed computation leaves the cell empty so a later call
//! can try again. Entries live until their namespace is cleared.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Unknown cache namespace: {0}")]
    UnknownNamespace(String),

    #[error("Failed to compute cache entry '{key}' in '{namespace}': {source:#}")]
    Compute {
        namespace: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

type Namespace<V> = Mutex<HashMap<String, Arc<OnceCell<V>>>>;

/// Memoizing cache shared by dispatch calls
pub struct LookupCache<V> {
    namespaces: Mutex<HashMap<String, Arc<Namespace<V>>>>,
}

impl<V> Default for LookupCache<V> {
    fn default() -> Self {
        Self {
            namespaces: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> LookupCache<V>
where
    V: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a namespace; existing namespaces are kept as they are
    pub fn new_namespace(&self, name: &str) {
        let mut namespaces = self.namespaces.lock().unwrap_or_else(|p| p.into_inner());
        namespaces
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())));
    }

    /// Cached value for `key`, computing it on first use
    pub async fn get<F, Fut>(&self, namespace: &str, key: &str, compute: F) -> Result<V, CacheError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let cell = {
            let region = self.region(namespace)?;
            let mut entries = region.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(entries.entry(key.to_string()).or_default())
        };

        let value = cell
            .get_or_try_init(|| async {
                debug!(namespace, key, "Cache miss");
                compute(key.to_string()).await
            })
            .await
            .map_err(|source| CacheError::Compute {
                namespace: namespace.to_string(),
                key: key.to_string(),
                source,
            })?;

        Ok(value.clone())
    }

    /// Whether a value is currently cached for `key`
    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        let Ok(region) = self.region(namespace) else {
            return false;
        };
        let entries = region.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(key).is_some_and(|cell| cell.initialized())
    }

    /// Drop every entry in a namespace
    pub fn clear(&self, namespace: &str) -> Result<(), CacheError> {
        let region = self.region(namespace)?;
        region.lock().unwrap_or_else(|p| p.into_inner()).clear();
        debug!(namespace, "Cache namespace cleared");
        Ok(())
    }

    /// Drop every entry in every namespace
    pub fn clear_all(&self) {
        let namespaces = self.namespaces.lock().unwrap_or_else(|p| p.into_inner());
        for region in namespaces.values() {
            region.lock().unwrap_or_else(|p| p.into_inner()).clear();
        }
    }

    fn region(&self, namespace: &str) -> Result<Arc<Namespace<V>>, CacheError> {
        let namespaces = self.namespaces.lock().unwrap_or_else(|p| p.into_inner());
        namespaces
            .get(namespace)
            .cloned()
            .ok_or_else(|| CacheError::UnknownNamespace(namespace.to_string()))
    }
}
