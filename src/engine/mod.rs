//! Decision orchestration pipeline
//!
//! Sequences the fixed state machine
//! `CACHE_LOOKUP → ROLE_CHECK → RISK_OVERRIDE_CHECK → POLICY_CHECK →
//! COMBINE → CACHE_STORE → AUDIT → DONE`, with an early exit to the audit
//! stage on deny. The orchestrator is stateless per call; the only state
//! shared across requests is the cache and the audit trail.
//!
//! `decide` never returns an error: every internal failure degrades to a
//! well-formed deny (role path, fail closed) or a neutral default (risk
//! path, fail open), and an audit record is appended for every request,
//! cache hit or miss.

pub mod audit;
pub mod cache;
pub mod decision;
pub mod metrics;

pub use audit::{AuditEntry, AuditSink, AuditStats, InMemoryAuditSink};
pub use cache::{CacheConfig, CacheKey, CacheStats, DecisionCache};
pub use decision::{DecideRequest, Decision, DecisionOutcome};
pub use metrics::{EngineMetrics, MetricsCollector};

use crate::attributes::{AttributeAdapter, AttributeStore};
use crate::evaluator::{risk_ceiling, PolicyEvaluator, PolicyVerdict};
use crate::policy::PolicyStore;
use crate::risk::{RiskOutcome, RiskScoreClient};
use crate::roles::{RoleResolver, RoleStore, DEFAULT_LOOKUP_TIMEOUT};
use crate::types::ScopeLevel;

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Decision cache; `None` disables caching and every request computes
    /// fresh (the `CacheUnavailable` degradation mode).
    pub cache: Option<CacheConfig>,

    /// Timeout applied to role and attribute lookups.
    pub lookup_timeout: Duration,

    /// Honor a caller-supplied `sira_score` context override. Test
    /// deployments only.
    pub allow_risk_override: bool,

    /// Collect in-process metrics.
    pub enable_metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: Some(CacheConfig::default()),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            allow_risk_override: false,
            enable_metrics: true,
        }
    }
}

/// The policy decision point.
///
/// Combines RBAC (role resolver), ABAC (policy evaluator over principal
/// attributes), and the risk-score ceiling into one `allow`/`deny` answer
/// with a human-readable reason.
pub struct DecisionEngine {
    roles: RoleResolver,
    attributes: AttributeAdapter,
    risk: RiskScoreClient,
    evaluator: PolicyEvaluator,
    cache: Option<DecisionCache>,
    audit: Arc<dyn AuditSink>,
    metrics: Option<Arc<MetricsCollector>>,
    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(
        config: EngineConfig,
        role_store: Arc<dyn RoleStore>,
        attribute_store: Arc<dyn AttributeStore>,
        policy_store: Arc<dyn PolicyStore>,
        risk: RiskScoreClient,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let cache = config.cache.clone().map(DecisionCache::new);
        let metrics = config.enable_metrics.then(|| Arc::new(MetricsCollector::new()));

        info!(
            cache = cache.is_some(),
            metrics = metrics.is_some(),
            "decision engine initialized"
        );

        Self {
            roles: RoleResolver::new(role_store).with_timeout(config.lookup_timeout),
            attributes: AttributeAdapter::new(attribute_store)
                .with_timeout(config.lookup_timeout),
            risk,
            evaluator: PolicyEvaluator::new(policy_store),
            cache,
            audit,
            metrics,
            config,
        }
    }

    /// Answer one authorization question. Always returns a decision; no
    /// collaborator failure propagates to the caller.
    pub async fn decide(&self, request: DecideRequest) -> Decision {
        let start = Instant::now();

        debug!(
            principal = %request.principal,
            module = %request.module,
            action = %request.action,
            "decision request"
        );

        if let Err(e) = request.validate() {
            let outcome = DecisionOutcome::deny(format!("internal_error: {e}"));
            return self.finish(&request, outcome, start, false, None).await;
        }

        let key = DecisionCache::compute_key(
            &request.principal,
            &request.module,
            &request.action,
            &request.context,
        );

        // CACHE_LOOKUP. A hit skips recomputation but not the audit write:
        // caching affects latency, not audit completeness.
        if let Some(cache) = &self.cache {
            if let Some((outcome, prior_audit)) = cache.get(&key) {
                debug!(prior_audit = %prior_audit, "decision cache hit");
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_hit().await;
                }
                return self.finish(&request, outcome, start, true, None).await;
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_cache_miss().await;
            }
        }

        let outcome = self.compute(&request).await;

        // Outage denies are not cached: pinning them for a TTL would extend
        // an incident past recovery.
        let store_key = (!outcome.is_internal_error()).then_some(key);
        self.finish(&request, outcome, start, false, store_key).await
    }

    /// ROLE_CHECK → RISK_OVERRIDE_CHECK → POLICY_CHECK → COMBINE.
    async fn compute(&self, request: &DecideRequest) -> DecisionOutcome {
        // ROLE_CHECK: the one lookup that fails closed.
        let resolution = self
            .roles
            .effective_roles(&request.principal, &request.module)
            .await;
        let grant = match (resolution.grant, resolution.degraded) {
            (Some(grant), _) => grant,
            (None, true) => {
                return DecisionOutcome::deny("internal_error: role lookup failed");
            }
            (None, false) => {
                return DecisionOutcome::deny("no role assigned for module");
            }
        };

        // Attribute and risk lookups may degrade; run them concurrently.
        let (attributes, risk) = tokio::join!(
            self.attributes.attributes_for(&request.principal),
            self.resolve_risk(request),
        );
        let score = risk.score();

        // RISK_OVERRIDE_CHECK: the bucket ceiling can deny, never grant.
        if let Some(reason) = risk_ceiling(request.class, &request.action, &request.context, score)
        {
            return DecisionOutcome::deny(reason).with_risk(risk);
        }

        // Admin grants short-circuit the policy layer for their module.
        if grant.scope == ScopeLevel::Admin {
            return DecisionOutcome::allow("admin scope grants all actions in module")
                .with_risk(risk);
        }

        // POLICY_CHECK
        let verdict = self
            .evaluator
            .evaluate(&request.module, &request.action, &attributes, score, &request.context)
            .await;

        // COMBINE: an evaluator opinion wins; otherwise RBAC decides.
        match verdict {
            PolicyVerdict::Deny { version, reason, .. } => {
                DecisionOutcome::deny(reason)
                    .with_policy_version(version)
                    .with_risk(risk)
            }
            PolicyVerdict::Allow { policy, version } => {
                DecisionOutcome::allow(format!(
                    "policy '{policy}' allows action '{}'",
                    request.action
                ))
                .with_policy_version(version)
                .with_risk(risk)
            }
            PolicyVerdict::NoOpinion => {
                if grant.scope.covers(request.class) {
                    DecisionOutcome::allow(format!(
                        "scope '{}' covers {}-class action",
                        grant.scope, request.class
                    ))
                    .with_risk(risk)
                } else {
                    DecisionOutcome::deny(format!(
                        "insufficient scope: '{}' does not cover {}-class action",
                        grant.scope, request.class
                    ))
                    .with_risk(risk)
                }
            }
        }
    }

    async fn resolve_risk(&self, request: &DecideRequest) -> RiskOutcome {
        if self.config.allow_risk_override {
            if let Some(score) = request.context.sira_score {
                debug!(score, "using caller-supplied risk score override");
                return RiskOutcome::Scored { score };
            }
        }
        self.risk.score_for(&request.principal).await
    }

    /// CACHE_STORE + AUDIT + DONE. Audit always runs; its failure is logged
    /// and swallowed, never surfaced and never allowed to flip the decision.
    async fn finish(
        &self,
        request: &DecideRequest,
        outcome: DecisionOutcome,
        start: Instant,
        cache_hit: bool,
        store_key: Option<CacheKey>,
    ) -> Decision {
        let latency = start.elapsed();
        let latency_ms = latency.as_millis() as u64;

        let entry = AuditEntry {
            id: AuditEntry::new_id(),
            principal: request.principal.clone(),
            module: request.module.clone(),
            action: request.action.clone(),
            resource: request.resource.clone(),
            allowed: outcome.allowed,
            reason: outcome.reason.clone(),
            policy_version: outcome.policy_version.clone(),
            risk: outcome.risk,
            latency_ms,
            cache_hit,
            timestamp: Utc::now(),
        };
        let fallback_id = entry.id.clone();

        let audit_id = match self.audit.append(entry).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "audit write failed; decision stands");
                fallback_id
            }
        };

        if let (Some(key), Some(cache)) = (store_key, &self.cache) {
            cache.put(
                key,
                &request.principal,
                &request.module,
                outcome.clone(),
                audit_id.clone(),
            );
        }

        if let Some(metrics) = &self.metrics {
            metrics
                .record_decision(outcome.allowed, outcome.is_internal_error())
                .await;
            metrics.record_latency(latency).await;
            if matches!(outcome.risk, Some(RiskOutcome::Unavailable { .. })) {
                metrics.record_risk_unavailable().await;
            }
        }

        info!(
            principal = %request.principal,
            module = %request.module,
            action = %request.action,
            allowed = outcome.allowed,
            cache_hit,
            latency_ms,
            reason = %outcome.reason,
            "decision"
        );

        Decision {
            id: Uuid::new_v4().to_string(),
            principal: request.principal.clone(),
            module: request.module.clone(),
            action: request.action.clone(),
            resource: request.resource.clone(),
            allowed: outcome.allowed,
            reason: outcome.reason,
            policy_version: outcome.policy_version,
            risk: outcome.risk,
            audit_id,
            latency_ms,
            cache_hit,
            created_at: Utc::now(),
        }
    }

    /// Drop cached decisions for `(principal, module)`. The role-management
    /// subsystem must call this on every role assignment change.
    pub fn invalidate_principal_module(&self, principal: &str, module: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_principal_module(principal, module);
        }
    }

    /// Drop the cached risk score for a principal (e.g. after a fraud event).
    pub fn invalidate_risk(&self, principal: &str) {
        self.risk.invalidate(principal);
    }

    pub async fn metrics(&self) -> Option<EngineMetrics> {
        match &self.metrics {
            Some(collector) => Some(collector.snapshot().await),
            None => None,
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(DecisionCache::stats)
    }
}
