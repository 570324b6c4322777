//! Policy evaluation and the fixed risk-bucket ceiling
//!
//! Two layers, both deterministic and short-circuiting:
//!
//! 1. [`risk_ceiling`] — a hardcoded, always-on restriction derived from the
//!    risk bucket. Runs before any tenant policy, can deny but never grant.
//! 2. [`PolicyEvaluator::evaluate`] — tenant policies in descending priority
//!    order; the first rule whose action matches and whose conditions all
//!    hold decides. No matching rule means no opinion, leaving the final
//!    decision to RBAC.

use crate::context::DecisionContext;
use crate::policy::{Condition, Policy, PolicyEffect, PolicyStore};
use crate::types::{ActionClass, KycLevel, RiskBucket};
use chrono::{Local, Timelike};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Local business hours window, `[start, end)`.
pub const BUSINESS_HOURS: std::ops::Range<u32> = 6..20;

/// Transfer amount above which medium-risk principals are blocked.
pub const MEDIUM_RISK_TRANSFER_CEILING: f64 = 100_000.0;

/// Minimum score for admin-class actions in the `low` risk bucket.
pub const LOW_RISK_ADMIN_FLOOR: u8 = 80;

/// Net contribution of the tenant-policy layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyVerdict {
    Allow { policy: String, version: String },
    Deny { policy: String, version: String, reason: String },
    NoOpinion,
}

/// Risk-bucket ceiling, evaluated before tenant policies.
///
/// Returns a deny reason when the bucket forbids the request; `None` means
/// the ceiling does not object (it never grants).
pub fn risk_ceiling(
    class: ActionClass,
    action: &str,
    context: &DecisionContext,
    score: u8,
) -> Option<String> {
    match RiskBucket::from_score(score) {
        RiskBucket::High => {
            if class != ActionClass::Read {
                return Some(format!(
                    "risk ceiling: high risk (score {score}) permits read-class actions only"
                ));
            }
            None
        }
        RiskBucket::Medium => {
            if class == ActionClass::Admin || action == "delete" {
                return Some(format!(
                    "risk ceiling: medium risk (score {score}) blocks admin-class and delete actions"
                ));
            }
            if action == "transfer" {
                if let Some(amount) = context.amount {
                    if amount > MEDIUM_RISK_TRANSFER_CEILING {
                        return Some(format!(
                            "risk ceiling: medium risk (score {score}) blocks transfers above {MEDIUM_RISK_TRANSFER_CEILING}"
                        ));
                    }
                }
            }
            None
        }
        RiskBucket::Low => {
            if class == ActionClass::Admin && score < LOW_RISK_ADMIN_FLOOR {
                return Some(format!(
                    "risk ceiling: admin-class actions require score >= {LOW_RISK_ADMIN_FLOOR}, got {score}"
                ));
            }
            None
        }
        RiskBucket::VeryLow => None,
    }
}

/// Evaluates tenant policies for one module.
pub struct PolicyEvaluator {
    store: Arc<dyn PolicyStore>,
}

impl PolicyEvaluator {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    /// Evaluate the active policies for `module` against the request.
    ///
    /// A policy store failure degrades to no opinion with a warning; RBAC
    /// still gates the request, so nothing is granted that the role set
    /// would not grant anyway.
    pub async fn evaluate(
        &self,
        module: &str,
        action: &str,
        attributes: &HashMap<String, String>,
        risk_score: u8,
        context: &DecisionContext,
    ) -> PolicyVerdict {
        let hour = Local::now().hour();
        self.evaluate_at_hour(module, action, attributes, risk_score, context, hour)
            .await
    }

    /// Same as [`evaluate`](Self::evaluate) with an explicit local hour,
    /// so business-hours conditions are testable.
    pub async fn evaluate_at_hour(
        &self,
        module: &str,
        action: &str,
        attributes: &HashMap<String, String>,
        risk_score: u8,
        context: &DecisionContext,
        local_hour: u32,
    ) -> PolicyVerdict {
        let mut policies = match self.store.active_policies(module).await {
            Ok(policies) => policies,
            Err(e) => {
                warn!(module, error = %e, "policy store unavailable, evaluator has no opinion");
                return PolicyVerdict::NoOpinion;
            }
        };

        // The store contract sorts, but the order decides outcomes; enforce it.
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));

        for policy in &policies {
            for rule in policy.rules.iter().filter(|r| r.matches_action(action)) {
                let all_hold = rule.conditions.iter().all(|condition| {
                    condition_holds(condition, attributes, risk_score, context, local_hour)
                });
                if !all_hold {
                    continue;
                }

                debug!(
                    module,
                    action,
                    policy = %policy.name,
                    effect = ?rule.effect,
                    "policy rule decided"
                );
                return match rule.effect {
                    PolicyEffect::Allow => PolicyVerdict::Allow {
                        policy: policy.name.clone(),
                        version: policy.version.clone(),
                    },
                    PolicyEffect::Deny => PolicyVerdict::Deny {
                        policy: policy.name.clone(),
                        version: policy.version.clone(),
                        reason: format!("policy '{}' denies action '{action}'", policy.name),
                    },
                };
            }
        }

        PolicyVerdict::NoOpinion
    }
}

/// Whether one condition is satisfied.
///
/// Conditions over missing or unparsable attributes are not satisfied; an
/// unknown key never satisfies a gate by default.
fn condition_holds(
    condition: &Condition,
    attributes: &HashMap<String, String>,
    risk_score: u8,
    context: &DecisionContext,
    local_hour: u32,
) -> bool {
    match condition {
        Condition::SiraThreshold(threshold) => risk_score >= *threshold,
        Condition::KycMinLevel(min) => effective_kyc(attributes, context)
            .map_or(false, |level| level >= *min),
        Condition::BusinessHours(required) => {
            !required || BUSINESS_HOURS.contains(&local_hour)
        }
        Condition::CountryEquals(expected) => attributes
            .get("country")
            .cloned()
            .or_else(|| context.country.clone())
            .map_or(false, |c| c == *expected),
    }
}

/// KYC level from the identity store, with the request context as fallback
/// for callers that inline it.
fn effective_kyc(
    attributes: &HashMap<String, String>,
    context: &DecisionContext,
) -> Option<KycLevel> {
    attributes
        .get("kyc_level")
        .and_then(|s| s.parse().ok())
        .or(context.kyc_level)
}
