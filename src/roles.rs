//! Effective role resolution (RBAC)
//!
//! Flattens a principal's non-expired grants for one module into a single
//! effective privilege. Role lookup is on the critical path and fails closed:
//! a store error or timeout yields an empty resolution flagged `degraded`,
//! which the orchestrator turns into a deny. The resolver itself never
//! returns an error.

use crate::error::Result;
use crate::types::{RoleAssignment, RoleGrant, ScopeLevel};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

/// Default timeout for role store lookups.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(500);

/// Read interface over the (out-of-scope) role-management subsystem.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// All grants for `(principal, module)`. The resolver re-checks expiry,
    /// so stores may return recently expired rows without harm.
    async fn list_active_roles(
        &self,
        principal: &str,
        module: &str,
    ) -> Result<Vec<RoleAssignment>>;
}

/// Outcome of one resolution pass.
///
/// `degraded = true` means the store could not be consulted at all; the
/// orchestrator must report that as an internal failure, distinct from a
/// clean "no role assigned" deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleResolution {
    pub grant: Option<RoleGrant>,
    pub degraded: bool,
}

impl RoleResolution {
    fn empty() -> Self {
        Self { grant: None, degraded: false }
    }

    fn degraded() -> Self {
        Self { grant: None, degraded: true }
    }
}

/// Resolves the effective role set for a `(principal, module)` pair.
pub struct RoleResolver {
    store: Arc<dyn RoleStore>,
    timeout: Duration,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self { store, timeout: DEFAULT_LOOKUP_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Compute the effective grant for a principal in a module.
    ///
    /// Any `admin` grant wins outright; otherwise the highest scope among
    /// `{read, write}` is kept. Trust level is the maximum across all live
    /// rows, since a principal may hold a base role plus a temporary
    /// elevation and greater privilege always wins.
    pub async fn effective_roles(&self, principal: &str, module: &str) -> RoleResolution {
        let lookup = self.store.list_active_roles(principal, module);
        let rows = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                warn!(principal, module, error = %e, "role store lookup failed, failing closed");
                return RoleResolution::degraded();
            }
            Err(_) => {
                warn!(
                    principal,
                    module,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "role store lookup timed out, failing closed"
                );
                return RoleResolution::degraded();
            }
        };

        let now = Utc::now();
        let mut grant: Option<RoleGrant> = None;
        for row in rows.iter().filter(|r| r.is_active(now)) {
            grant = Some(match grant {
                None => RoleGrant { scope: row.scope, trust_level: row.trust_level },
                Some(g) => RoleGrant {
                    scope: g.scope.max(row.scope),
                    trust_level: g.trust_level.max(row.trust_level),
                },
            });
        }

        match grant {
            Some(g) => RoleResolution { grant: Some(g), degraded: false },
            None => RoleResolution::empty(),
        }
    }
}

/// In-memory role store for single-instance deployments and tests.
pub struct InMemoryRoleStore {
    rows: RwLock<Vec<RoleAssignment>>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self { rows: RwLock::new(Vec::new()) }
    }

    /// Record a grant. Mirrors what the role-management subsystem writes;
    /// callers are responsible for invalidating the decision cache for the
    /// affected `(principal, module)` pair.
    pub async fn grant(&self, assignment: RoleAssignment) {
        self.rows.write().await.push(assignment);
    }

    /// Remove every grant for `(principal, module)`.
    pub async fn revoke(&self, principal: &str, module: &str) {
        self.rows
            .write()
            .await
            .retain(|r| !(r.principal == principal && r.module == module));
    }
}

impl Default for InMemoryRoleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn list_active_roles(
        &self,
        principal: &str,
        module: &str,
    ) -> Result<Vec<RoleAssignment>> {
        let now = Utc::now();
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| r.principal == principal && r.module == module && r.is_active(now))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthzError;
    use chrono::Duration as ChronoDuration;

    struct FailingRoleStore;

    #[async_trait]
    impl RoleStore for FailingRoleStore {
        async fn list_active_roles(
            &self,
            _principal: &str,
            _module: &str,
        ) -> Result<Vec<RoleAssignment>> {
            Err(AuthzError::RoleLookup("connection refused".into()))
        }
    }

    struct HangingRoleStore;

    #[async_trait]
    impl RoleStore for HangingRoleStore {
        async fn list_active_roles(
            &self,
            _principal: &str,
            _module: &str,
        ) -> Result<Vec<RoleAssignment>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_no_grants_resolves_empty() {
        let store = Arc::new(InMemoryRoleStore::new());
        let resolver = RoleResolver::new(store);

        let resolution = resolver.effective_roles("user:alice", "pay").await;
        assert_eq!(resolution.grant, None);
        assert!(!resolution.degraded);
    }

    #[tokio::test]
    async fn test_admin_grant_wins() {
        let store = Arc::new(InMemoryRoleStore::new());
        store
            .grant(RoleAssignment::new("user:alice", "pay", ScopeLevel::Read).with_trust_level(80))
            .await;
        store
            .grant(RoleAssignment::new("user:alice", "pay", ScopeLevel::Admin).with_trust_level(20))
            .await;

        let resolver = RoleResolver::new(store);
        let grant = resolver.effective_roles("user:alice", "pay").await.grant.unwrap();
        assert_eq!(grant.scope, ScopeLevel::Admin);
        // Trust is the maximum across rows, independent of which row won on scope
        assert_eq!(grant.trust_level, 80);
    }

    #[tokio::test]
    async fn test_highest_of_read_write_wins() {
        let store = Arc::new(InMemoryRoleStore::new());
        store
            .grant(RoleAssignment::new("user:bob", "pay", ScopeLevel::Read).with_trust_level(10))
            .await;
        store
            .grant(RoleAssignment::new("user:bob", "pay", ScopeLevel::Write).with_trust_level(5))
            .await;

        let resolver = RoleResolver::new(store);
        let grant = resolver.effective_roles("user:bob", "pay").await.grant.unwrap();
        assert_eq!(grant.scope, ScopeLevel::Write);
        assert_eq!(grant.trust_level, 10);
    }

    #[tokio::test]
    async fn test_expired_grants_are_ignored() {
        let store = Arc::new(InMemoryRoleStore::new());
        store
            .grant(
                RoleAssignment::new("user:carol", "pay", ScopeLevel::Admin)
                    .with_expiry(Utc::now() - ChronoDuration::minutes(5)),
            )
            .await;

        let resolver = RoleResolver::new(store);
        let resolution = resolver.effective_roles("user:carol", "pay").await;
        assert_eq!(resolution.grant, None);
        assert!(!resolution.degraded);
    }

    #[tokio::test]
    async fn test_store_error_fails_closed_and_degraded() {
        let resolver = RoleResolver::new(Arc::new(FailingRoleStore));
        let resolution = resolver.effective_roles("user:alice", "pay").await;
        assert_eq!(resolution.grant, None);
        assert!(resolution.degraded);
    }

    #[tokio::test]
    async fn test_store_timeout_fails_closed_and_degraded() {
        let resolver =
            RoleResolver::new(Arc::new(HangingRoleStore)).with_timeout(Duration::from_millis(20));
        let resolution = resolver.effective_roles("user:alice", "pay").await;
        assert_eq!(resolution.grant, None);
        assert!(resolution.degraded);
    }

    #[tokio::test]
    async fn test_grants_are_module_scoped() {
        let store = Arc::new(InMemoryRoleStore::new());
        store
            .grant(RoleAssignment::new("user:alice", "pay", ScopeLevel::Admin))
            .await;

        let resolver = RoleResolver::new(store);
        let other = resolver.effective_roles("user:alice", "profiles").await;
        assert_eq!(other.grant, None);
    }
}
