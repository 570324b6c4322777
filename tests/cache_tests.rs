//! Decision cache behavior through the full engine
//!
//! TTL expiry, context sensitivity of cache keys, and the scope of
//! invalidation when roles or policies change.

use authz_pdp::{
    CacheConfig, DecideRequest, DecisionContext, DecisionEngine, EngineConfig,
    InMemoryAttributeStore, InMemoryAuditSink, InMemoryPolicyStore, InMemoryRoleStore, Policy,
    PolicyEffect, PolicyRule, RiskScoreClient, RoleAssignment, ScopeLevel,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    engine: DecisionEngine,
    roles: Arc<InMemoryRoleStore>,
    policies: Arc<InMemoryPolicyStore>,
}

fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

async fn harness(config: EngineConfig) -> Harness {
    trace_init();
    let roles = Arc::new(InMemoryRoleStore::new());
    let policies = Arc::new(InMemoryPolicyStore::new());

    roles
        .grant(RoleAssignment::new("user:alice", "pay", ScopeLevel::Write))
        .await;
    roles
        .grant(RoleAssignment::new("user:alice", "profiles", ScopeLevel::Write))
        .await;

    let engine = DecisionEngine::new(
        config,
        roles.clone(),
        Arc::new(InMemoryAttributeStore::new()),
        policies.clone(),
        RiskScoreClient::disabled(),
        Arc::new(InMemoryAuditSink::new()),
    );

    Harness { engine, roles, policies }
}

#[tokio::test]
async fn test_ttl_expiry_recomputes() {
    let h = harness(EngineConfig {
        cache: Some(CacheConfig {
            capacity: 100,
            ttl: Duration::from_millis(50),
        }),
        ..Default::default()
    })
    .await;

    let request = DecideRequest::new("user:alice", "pay", "read", "/pay/balance");
    h.engine.decide(request.clone()).await;

    let warm = h.engine.decide(request.clone()).await;
    assert!(warm.cache_hit);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let expired = h.engine.decide(request).await;
    assert!(!expired.cache_hit, "expired entries must recompute");
    assert!(expired.allowed);
}

#[tokio::test]
async fn test_context_changes_produce_distinct_cache_entries() {
    let h = harness(EngineConfig::default()).await;

    let small = DecideRequest::new("user:alice", "pay", "transfer", "/pay/transfer")
        .with_context(DecisionContext::new().with_amount(10_000.0));
    let large = DecideRequest::new("user:alice", "pay", "transfer", "/pay/transfer")
        .with_context(DecisionContext::new().with_amount(90_000.0));

    h.engine.decide(small.clone()).await;
    let other_amount = h.engine.decide(large).await;
    assert!(
        !other_amount.cache_hit,
        "a different amount is a different decision"
    );

    let same_amount = h.engine.decide(small).await;
    assert!(same_amount.cache_hit);
}

#[tokio::test]
async fn test_invalidation_is_scoped_to_principal_and_module() {
    let h = harness(EngineConfig::default()).await;

    let pay = DecideRequest::new("user:alice", "pay", "read", "/pay/balance");
    let profiles = DecideRequest::new("user:alice", "profiles", "read", "/profiles/me");
    h.engine.decide(pay.clone()).await;
    h.engine.decide(profiles.clone()).await;

    h.engine.invalidate_principal_module("user:alice", "pay");

    assert!(!h.engine.decide(pay).await.cache_hit);
    assert!(
        h.engine.decide(profiles).await.cache_hit,
        "other modules keep their entries"
    );
}

#[tokio::test]
async fn test_policy_change_served_after_invalidation() {
    let h = harness(EngineConfig::default()).await;

    let request = DecideRequest::new("user:alice", "pay", "transfer", "/pay/transfer");
    let before = h.engine.decide(request.clone()).await;
    assert!(before.allowed);

    // Policy administration publishes a freeze and invalidates the module.
    h.policies
        .put(
            Policy::new("pay", "freeze")
                .with_priority(100)
                .with_rule(PolicyRule::new("transfer", PolicyEffect::Deny)),
        )
        .await;
    h.engine.invalidate_principal_module("user:alice", "pay");

    let after = h.engine.decide(request).await;
    assert!(!after.allowed);
    assert!(after.reason.contains("freeze"));
}

#[tokio::test]
async fn test_cache_stats_reflect_traffic() {
    let h = harness(EngineConfig::default()).await;

    let request = DecideRequest::new("user:alice", "pay", "read", "/pay/balance");
    h.engine.decide(request.clone()).await;
    h.engine.decide(request.clone()).await;
    h.engine.decide(request).await;

    let stats = h.engine.cache_stats().expect("cache enabled");
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn test_revoked_principal_does_not_ride_the_cache_of_others() {
    let h = harness(EngineConfig::default()).await;
    h.roles
        .grant(RoleAssignment::new("user:bob", "pay", ScopeLevel::Write))
        .await;

    let alice = DecideRequest::new("user:alice", "pay", "read", "/pay/balance");
    let bob = DecideRequest::new("user:bob", "pay", "read", "/pay/balance");
    h.engine.decide(alice.clone()).await;
    h.engine.decide(bob.clone()).await;

    h.roles.revoke("user:bob", "pay").await;
    h.engine.invalidate_principal_module("user:bob", "pay");

    assert!(h.engine.decide(alice).await.cache_hit, "alice is unaffected");
    let bob_after = h.engine.decide(bob).await;
    assert!(!bob_after.cache_hit);
    assert!(!bob_after.allowed);
}
