//! Audit trail for authorization decisions
//!
//! Every call to `decide` appends exactly one record, cache hit or miss.
//! The sink only needs append semantics; immutability and cryptographic
//! sealing of the durable store are a separate subsystem. A failed append is
//! logged and swallowed upstream, never allowed to flip or block a decision.

use crate::error::Result;
use crate::risk::RiskOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Soft cap on the in-memory buffer.
const BUFFER_LIMIT: usize = 10_000;

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID, assigned before the append is attempted.
    pub id: String,

    pub principal: String,
    pub module: String,
    pub action: String,
    pub resource: String,

    pub allowed: bool,
    pub reason: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskOutcome>,

    pub latency_ms: u64,
    pub cache_hit: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// Append-only sink for decision records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a record, returning its audit id. Fire-and-forget durability
    /// is acceptable as long as the record eventually lands independently of
    /// the decision path.
    async fn append(&self, entry: AuditEntry) -> Result<String>;
}

/// Aggregate statistics over the buffered trail.
#[derive(Debug, Clone, Default)]
pub struct AuditStats {
    pub total_decisions: usize,
    pub allowed_decisions: usize,
    pub denied_decisions: usize,
    pub avg_latency_ms: f64,
}

/// In-memory sink for single-instance deployments and tests.
pub struct InMemoryAuditSink {
    buffer: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self { buffer: RwLock::new(Vec::new()) }
    }

    /// Most recent entries for a principal, newest first.
    pub async fn query_by_principal(&self, principal: &str, limit: usize) -> Vec<AuditEntry> {
        self.buffer
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| e.principal == principal)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.read().await.is_empty()
    }

    pub async fn stats(&self) -> AuditStats {
        let buffer = self.buffer.read().await;
        let total = buffer.len();
        let allowed = buffer.iter().filter(|e| e.allowed).count();
        let avg_latency_ms = if total > 0 {
            buffer.iter().map(|e| e.latency_ms).sum::<u64>() as f64 / total as f64
        } else {
            0.0
        };

        AuditStats {
            total_decisions: total,
            allowed_decisions: allowed,
            denied_decisions: total - allowed,
            avg_latency_ms,
        }
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<String> {
        let id = entry.id.clone();
        let mut buffer = self.buffer.write().await;
        buffer.push(entry);

        if buffer.len() > BUFFER_LIMIT {
            let excess = buffer.len() - BUFFER_LIMIT;
            buffer.drain(0..excess);
        }

        Ok(id)
    }
}
