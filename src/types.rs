//! Core authorization types
//!
//! The role hierarchy (`read` ⊂ `write` ⊂ `admin`), KYC levels and risk
//! buckets are explicit ordinal enums with a total order rather than string
//! comparisons, so the ordering rules are independently testable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Module-scoped access level.
///
/// Higher scopes imply every lower-scope capability within the same module.
/// This hierarchy is fixed and not configurable per policy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    Read,
    Write,
    Admin,
}

impl ScopeLevel {
    /// Whether this scope satisfies a request of the given action class.
    pub fn covers(&self, class: ActionClass) -> bool {
        *self >= class.required_scope()
    }
}

impl fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Caller-supplied classification of the requested action.
///
/// The PDP does not guess what an action does; the enforcement point that
/// names the action also classifies it. [`ActionClass::infer`] exists for
/// callers with conventional verb names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionClass {
    Read,
    Write,
    Admin,
}

impl ActionClass {
    /// Minimum scope that satisfies this class.
    pub fn required_scope(&self) -> ScopeLevel {
        match self {
            Self::Read => ScopeLevel::Read,
            Self::Write => ScopeLevel::Write,
            Self::Admin => ScopeLevel::Admin,
        }
    }

    /// Classify a conventional action verb.
    ///
    /// Unrecognized actions classify as write, never read: an unknown verb
    /// must not slip through on a read-only grant.
    pub fn infer(action: &str) -> Self {
        match action {
            "read" | "get" | "list" | "view" | "query" | "export" => Self::Read,
            "admin" | "configure" | "manage" | "grant" | "revoke" => Self::Admin,
            _ => Self::Write,
        }
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// KYC verification level with a fixed ordinal order `P0 < P1 < P2 < P3`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum KycLevel {
    P0,
    P1,
    P2,
    P3,
}

impl FromStr for KycLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "P0" => Ok(Self::P0),
            "P1" => Ok(Self::P1),
            "P2" => Ok(Self::P2),
            "P3" => Ok(Self::P3),
            other => Err(format!("unknown kyc level: {other}")),
        }
    }
}

impl fmt::Display for KycLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::P0 => write!(f, "P0"),
            Self::P1 => write!(f, "P1"),
            Self::P2 => write!(f, "P2"),
            Self::P3 => write!(f, "P3"),
        }
    }
}

/// Coarse risk classification derived from a continuous 0-100 score.
///
/// Bucketing is fixed: `score >= 90 -> very_low`, `>= 70 -> low`,
/// `>= 41 -> medium`, else `high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBucket {
    High,
    Medium,
    Low,
    VeryLow,
}

impl RiskBucket {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=100 => Self::VeryLow,
            70..=89 => Self::Low,
            41..=69 => Self::Medium,
            _ => Self::High,
        }
    }
}

impl fmt::Display for RiskBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::VeryLow => write!(f, "very_low"),
        }
    }
}

/// A single role grant as stored by the role-management subsystem.
///
/// Read-only to this engine; grants with `expires_at` in the past never
/// enter the effective role set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub principal: String,
    pub module: String,
    pub scope: ScopeLevel,

    /// 0-100, consumed only by policy rules that gate on trust.
    pub trust_level: u8,

    pub granted_by: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    pub fn new(
        principal: impl Into<String>,
        module: impl Into<String>,
        scope: ScopeLevel,
    ) -> Self {
        Self {
            principal: principal.into(),
            module: module.into(),
            scope,
            trust_level: 0,
            granted_by: "role-admin".to_string(),
            expires_at: None,
        }
    }

    pub fn with_trust_level(mut self, trust_level: u8) -> Self {
        self.trust_level = trust_level;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the grant is active at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// Effective privilege a principal holds for one module after flattening
/// multiple grants: the highest scope wins, trust is the maximum across rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub scope: ScopeLevel,
    pub trust_level: u8,
}
