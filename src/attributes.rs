//! Attribute store adapter (ABAC inputs)
//!
//! Fetches the flat key/value attribute map for a principal. In contrast to
//! role lookup this path fails open: a store error or timeout degrades to an
//! empty map, and policy conditions referencing a missing key fail toward
//! non-match rather than blocking the request outright.

use crate::error::Result;
use crate::roles::DEFAULT_LOOKUP_TIMEOUT;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

/// Read interface over the identity store's attribute table.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    async fn list_attributes(&self, principal: &str) -> Result<HashMap<String, String>>;
}

/// Adapter that applies the timeout and fail-open policy on top of a store.
pub struct AttributeAdapter {
    store: Arc<dyn AttributeStore>,
    timeout: Duration,
}

impl AttributeAdapter {
    pub fn new(store: Arc<dyn AttributeStore>) -> Self {
        Self { store, timeout: DEFAULT_LOOKUP_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attributes for a principal; empty map on any failure.
    pub async fn attributes_for(&self, principal: &str) -> HashMap<String, String> {
        let lookup = self.store.list_attributes(principal);
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(attrs)) => attrs,
            Ok(Err(e)) => {
                warn!(principal, error = %e, "attribute lookup failed, treating attributes as unknown");
                HashMap::new()
            }
            Err(_) => {
                warn!(
                    principal,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "attribute lookup timed out, treating attributes as unknown"
                );
                HashMap::new()
            }
        }
    }
}

/// In-memory attribute store for single-instance deployments and tests.
pub struct InMemoryAttributeStore {
    attributes: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryAttributeStore {
    pub fn new() -> Self {
        Self { attributes: RwLock::new(HashMap::new()) }
    }

    /// Set one attribute, replacing any current value for the key.
    pub async fn set(&self, principal: &str, key: impl Into<String>, value: impl Into<String>) {
        self.attributes
            .write()
            .await
            .entry(principal.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }
}

impl Default for InMemoryAttributeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttributeStore for InMemoryAttributeStore {
    async fn list_attributes(&self, principal: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .attributes
            .read()
            .await
            .get(principal)
            .cloned()
            .unwrap_or_default())
    }
}
