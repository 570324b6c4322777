//! Decision cache with TTL and per-(principal, module) invalidation
//!
//! Content-addressed by a BLAKE3 hash of (principal, module, action,
//! canonical context). A reverse index from `(principal, module)` to the set
//! of live keys makes role-change invalidation exact without knowing every
//! historical action/context combination; the alternative (TTL-bounded
//! staleness) was rejected, see DESIGN.md. Entries are deleted, never
//! mutated in place; concurrent puts on one key are last-write-wins.

use crate::context::DecisionContext;
use crate::engine::decision::DecisionOutcome;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache key type (BLAKE3 hash).
pub type CacheKey = [u8; 32];

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub capacity: usize,

    /// Time-to-live for cached decisions.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(300),
        }
    }
}

struct CachedEntry {
    outcome: DecisionOutcome,
    audit_id: String,
    principal: String,
    module: String,
    expires_at: Instant,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Shared decision cache.
pub struct DecisionCache {
    entries: DashMap<CacheKey, CachedEntry>,
    index: DashMap<(String, String), HashSet<CacheKey>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

impl DecisionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            index: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Compute the content-addressed key for a request tuple.
    pub fn compute_key(
        principal: &str,
        module: &str,
        action: &str,
        context: &DecisionContext,
    ) -> CacheKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(principal.as_bytes());
        hasher.update(&[0]);
        hasher.update(module.as_bytes());
        hasher.update(&[0]);
        hasher.update(action.as_bytes());
        hasher.update(&[0]);
        context.hash_into(&mut hasher);
        *hasher.finalize().as_bytes()
    }

    /// Fetch a live cached outcome with the audit id of the original write.
    pub fn get(&self, key: &CacheKey) -> Option<(DecisionOutcome, String)> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                let owner = (entry.principal.clone(), entry.module.clone());
                drop(entry);
                self.remove_key(key, &owner);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some((entry.outcome.clone(), entry.audit_id.clone()));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store an outcome under `key` with the cache TTL.
    pub fn put(
        &self,
        key: CacheKey,
        principal: &str,
        module: &str,
        outcome: DecisionOutcome,
        audit_id: String,
    ) {
        if self.entries.len() >= self.config.capacity {
            self.evict_some();
        }

        self.entries.insert(
            key,
            CachedEntry {
                outcome,
                audit_id,
                principal: principal.to_string(),
                module: module.to_string(),
                expires_at: Instant::now() + self.config.ttl,
            },
        );
        self.index
            .entry((principal.to_string(), module.to_string()))
            .or_default()
            .insert(key);
    }

    /// Delete every entry derived from `(principal, module)`.
    ///
    /// The role-management subsystem calls this whenever a role assignment
    /// for the pair changes.
    pub fn invalidate_principal_module(&self, principal: &str, module: &str) {
        let owner = (principal.to_string(), module.to_string());
        if let Some((_, keys)) = self.index.remove(&owner) {
            let count = keys.len() as u64;
            for key in keys {
                self.entries.remove(&key);
            }
            self.invalidations.fetch_add(count, Ordering::Relaxed);
            debug!(principal, module, count, "invalidated cached decisions");
        }
    }

    /// Drop everything (e.g. on a policy change affecting all modules).
    pub fn invalidate_all(&self) {
        let count = self.entries.len() as u64;
        self.entries.clear();
        self.index.clear();
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    fn remove_key(&self, key: &CacheKey, owner: &(String, String)) {
        self.entries.remove(key);
        if let Some(mut keys) = self.index.get_mut(owner) {
            keys.remove(key);
        }
    }

    /// Shed expired entries first, then up to 10% of the remainder.
    fn evict_some(&self) {
        let mut shed: Vec<(CacheKey, (String, String))> = Vec::new();
        for entry in self.entries.iter() {
            if entry.is_expired() {
                shed.push((*entry.key(), (entry.principal.clone(), entry.module.clone())));
            }
        }

        if shed.is_empty() {
            let budget = (self.config.capacity / 10).max(1);
            for entry in self.entries.iter().take(budget) {
                shed.push((*entry.key(), (entry.principal.clone(), entry.module.clone())));
            }
        }

        for (key, owner) in shed {
            self.remove_key(&key, &owner);
        }
    }
}
