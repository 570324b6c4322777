//! Policy model and storage
//!
//! Tenant-configurable ABAC policies: per-module, versioned, evaluated in
//! descending priority order. Conditions are a closed enum, not a general
//! expression language; the engine recognizes exactly four gates.

use crate::error::Result;
use crate::types::KycLevel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Policy effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    Allow,
    Deny,
}

/// A single rule condition. All conditions of a rule must hold for the rule
/// to decide; a condition over an unknown attribute is not satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Holds iff the risk score is at or above the threshold.
    SiraThreshold(u8),

    /// Holds iff the principal's `kyc_level` attribute is present and at
    /// least the required level.
    KycMinLevel(KycLevel),

    /// When `true`, holds iff the current local hour is inside business
    /// hours; a `false` value places no constraint.
    BusinessHours(bool),

    /// Holds iff the principal's `country` attribute equals the value.
    CountryEquals(String),
}

/// One rule inside a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Action name this rule applies to, or `"*"` for any action.
    pub action: String,

    pub effect: PolicyEffect,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl PolicyRule {
    pub fn new(action: impl Into<String>, effect: PolicyEffect) -> Self {
        Self { action: action.into(), effect, conditions: Vec::new() }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn matches_action(&self, action: &str) -> bool {
        self.action == "*" || self.action == action
    }
}

/// Tenant policy: ordered rules for one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub module: String,
    pub name: String,
    pub version: String,

    /// Higher priority policies are evaluated first.
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub rules: Vec<PolicyRule>,
}

fn default_enabled() -> bool {
    true
}

impl Policy {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            version: "1".to_string(),
            priority: 0,
            enabled: true,
            rules: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Read interface over the (out-of-scope) policy administration subsystem.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Enabled policies for a module, sorted by priority descending.
    async fn active_policies(&self, module: &str) -> Result<Vec<Policy>>;
}

/// In-memory policy store for single-instance deployments and tests.
pub struct InMemoryPolicyStore {
    policies: RwLock<Vec<Policy>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self { policies: RwLock::new(Vec::new()) }
    }

    pub async fn put(&self, policy: Policy) {
        let mut policies = self.policies.write().await;
        policies.retain(|p| !(p.module == policy.module && p.name == policy.name));
        policies.push(policy);
    }

    pub async fn remove(&self, module: &str, name: &str) {
        self.policies
            .write()
            .await
            .retain(|p| !(p.module == module && p.name == name));
    }
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn active_policies(&self, module: &str) -> Result<Vec<Policy>> {
        let mut matching: Vec<Policy> = self
            .policies
            .read()
            .await
            .iter()
            .filter(|p| p.enabled && p.module == module)
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_action_matching() {
        let rule = PolicyRule::new("transfer", PolicyEffect::Allow);
        assert!(rule.matches_action("transfer"));
        assert!(!rule.matches_action("read"));

        let wildcard = PolicyRule::new("*", PolicyEffect::Deny);
        assert!(wildcard.matches_action("anything"));
    }

    #[test]
    fn test_condition_serde() {
        let rule = PolicyRule::new("transfer", PolicyEffect::Allow)
            .with_condition(Condition::SiraThreshold(70))
            .with_condition(Condition::KycMinLevel(KycLevel::P2))
            .with_condition(Condition::CountryEquals("MX".into()));

        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("sira_threshold"));
        assert!(json.contains("kyc_min_level"));

        let back: PolicyRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }

    #[tokio::test]
    async fn test_store_filters_disabled_and_other_modules() {
        let store = InMemoryPolicyStore::new();
        store.put(Policy::new("pay", "base")).await;
        store.put(Policy::new("pay", "off").disabled()).await;
        store.put(Policy::new("profiles", "other")).await;

        let active = store.active_policies("pay").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "base");
    }

    #[tokio::test]
    async fn test_store_sorts_by_priority_descending() {
        let store = InMemoryPolicyStore::new();
        store.put(Policy::new("pay", "low").with_priority(10)).await;
        store.put(Policy::new("pay", "high").with_priority(100)).await;
        store.put(Policy::new("pay", "mid").with_priority(50)).await;

        let active = store.active_policies("pay").await.unwrap();
        let names: Vec<_> = active.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_put_replaces_same_name() {
        let store = InMemoryPolicyStore::new();
        store.put(Policy::new("pay", "base").with_version("1")).await;
        store.put(Policy::new("pay", "base").with_version("2")).await;

        let active = store.active_policies("pay").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version, "2");
    }
}
