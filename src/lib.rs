//! # Authorization Decision Engine
//!
//! Centralized policy decision point (PDP) for the multi-module identity
//! platform. Given a principal, a target module/action/resource and a
//! request context, it returns an allow/deny decision with a human-readable
//! reason in bounded time and appends an immutable audit record for every
//! decision.
//!
//! ## Pipeline
//!
//! ```text
//! Request → Cache → RoleResolver → RiskCeiling → PolicyEvaluator → Combine
//!             ↓          ↓              ↓              ↓              ↓
//!          [Decision Cache] ────────────────────────────────────────┘
//!             ↓                                                     ↓
//!          [Audit Trail]                                        [Metrics]
//! ```
//!
//! ## Failure posture
//!
//! - Role lookup fails **closed**: store error or timeout denies.
//! - Attribute lookup fails **open**: conditions over unknown keys simply
//!   do not match.
//! - Risk scoring degrades to a neutral medium-risk default, tagged
//!   distinctly from the deliberate disabled mode.
//! - Cache and audit failures never block or flip a decision.
//!
//! ## Example
//!
//! ```no_run
//! use authz_pdp::{
//!     DecideRequest, DecisionEngine, EngineConfig, InMemoryAttributeStore,
//!     InMemoryAuditSink, InMemoryPolicyStore, InMemoryRoleStore, RiskScoreClient,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = DecisionEngine::new(
//!         EngineConfig::default(),
//!         Arc::new(InMemoryRoleStore::new()),
//!         Arc::new(InMemoryAttributeStore::new()),
//!         Arc::new(InMemoryPolicyStore::new()),
//!         RiskScoreClient::disabled(),
//!         Arc::new(InMemoryAuditSink::new()),
//!     );
//!
//!     let decision = engine
//!         .decide(DecideRequest::new("user:alice", "pay", "read", "/pay/balance"))
//!         .await;
//!
//!     println!("{}: {}", decision.allowed, decision.reason);
//! }
//! ```

pub mod attributes;
pub mod context;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod policy;
pub mod risk;
pub mod roles;
pub mod types;

// Re-export commonly used types
pub use attributes::{AttributeAdapter, AttributeStore, InMemoryAttributeStore};
pub use context::DecisionContext;
pub use engine::{
    AuditEntry, AuditSink, CacheConfig, CacheStats, DecideRequest, Decision, DecisionEngine,
    EngineConfig, EngineMetrics, InMemoryAuditSink,
};
pub use error::{AuthzError, Result};
pub use evaluator::{risk_ceiling, PolicyEvaluator, PolicyVerdict};
pub use policy::{Condition, InMemoryPolicyStore, Policy, PolicyEffect, PolicyRule, PolicyStore};
pub use risk::{HttpRiskService, RiskConfig, RiskMode, RiskOutcome, RiskScoreClient, RiskService};
pub use roles::{InMemoryRoleStore, RoleResolver, RoleStore};
pub use types::{ActionClass, KycLevel, RiskBucket, RoleAssignment, RoleGrant, ScopeLevel};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
