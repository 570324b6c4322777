//! Decision request and response types

use crate::context::DecisionContext;
use crate::error::{AuthzError, Result};
use crate::risk::RiskOutcome;
use crate::types::ActionClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One authorization question: may `principal` perform `action` on
/// `resource` within `module`, given `context`?
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideRequest {
    pub principal: String,
    pub module: String,
    pub action: String,

    /// Action classification supplied by the enforcement point.
    pub class: ActionClass,

    pub resource: String,

    #[serde(default)]
    pub context: DecisionContext,
}

impl DecideRequest {
    /// Build a request, inferring the action class from the verb.
    pub fn new(
        principal: impl Into<String>,
        module: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        let action = action.into();
        let class = ActionClass::infer(&action);
        Self {
            principal: principal.into(),
            module: module.into(),
            action,
            class,
            resource: resource.into(),
            context: DecisionContext::default(),
        }
    }

    pub fn with_class(mut self, class: ActionClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_context(mut self, context: DecisionContext) -> Self {
        self.context = context;
        self
    }

    /// Parse a free-form JSON context at the boundary.
    pub fn with_json_context(
        mut self,
        raw: &HashMap<String, serde_json::Value>,
    ) -> Result<Self> {
        self.context = DecisionContext::from_json(raw)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.principal.is_empty() {
            return Err(AuthzError::InvalidInput("principal must be non-empty".into()));
        }
        if self.module.is_empty() {
            return Err(AuthzError::InvalidInput("module must be non-empty".into()));
        }
        if self.action.is_empty() {
            return Err(AuthzError::InvalidInput("action must be non-empty".into()));
        }
        Ok(())
    }
}

/// The computed part of a decision, independent of which request served it.
///
/// This is the value cached for repeat requests; identifiers, latency and the
/// cache-hit flag belong to the individual [`Decision`] response instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub allowed: bool,
    pub reason: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<String>,

    /// Risk outcome observed when the decision was computed; `None` when the
    /// pipeline denied before reaching the risk stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskOutcome>,
}

impl DecisionOutcome {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            policy_version: None,
            risk: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            policy_version: None,
            risk: None,
        }
    }

    pub fn with_policy_version(mut self, version: impl Into<String>) -> Self {
        self.policy_version = Some(version.into());
        self
    }

    pub fn with_risk(mut self, risk: RiskOutcome) -> Self {
        self.risk = Some(risk);
        self
    }

    /// Denies caused by collaborator outages carry the `internal_error:`
    /// prefix and are never cached.
    pub fn is_internal_error(&self) -> bool {
        self.reason.starts_with("internal_error:")
    }
}

/// The full answer returned to the caller. Immutable once created; this is
/// also the unit the audit writer records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision identifier.
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

    /// Identifier of the audit record written for this request.
    pub audit_id: String,

    pub latency_ms: u64,
    pub cache_hit: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_infers_class() {
        let req = DecideRequest::new("user:alice", "pay", "read", "/pay/balance");
        assert_eq!(req.class, ActionClass::Read);

        let req = DecideRequest::new("user:alice", "pay", "transfer", "/pay/transfer");
        assert_eq!(req.class, ActionClass::Write);
    }

    #[test]
    fn test_request_validation() {
        assert!(DecideRequest::new("user:alice", "pay", "read", "/r").validate().is_ok());
        assert!(DecideRequest::new("user:alice", "", "read", "/r").validate().is_err());
        assert!(DecideRequest::new("user:alice", "pay", "", "/r").validate().is_err());
        assert!(DecideRequest::new("", "pay", "read", "/r").validate().is_err());
    }

    #[test]
    fn test_json_context_boundary() {
        let mut raw = HashMap::new();
        raw.insert("amount".to_string(), json!(50000));

        let req = DecideRequest::new("user:alice", "pay", "transfer", "/pay/transfer")
            .with_json_context(&raw)
            .unwrap();
        assert_eq!(req.context.amount, Some(50000.0));

        let mut bad = HashMap::new();
        bad.insert("amount".to_string(), json!("much"));
        let result =
            DecideRequest::new("user:alice", "pay", "transfer", "/t").with_json_context(&bad);
        assert!(result.is_err());
    }

    #[test]
    fn test_internal_error_marker() {
        assert!(DecisionOutcome::deny("internal_error: role lookup failed").is_internal_error());
        assert!(!DecisionOutcome::deny("no role assigned for module").is_internal_error());
    }
}
