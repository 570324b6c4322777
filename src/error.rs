//! Error types for the decision engine
//!
//! The taxonomy mirrors the failure modes of each collaborator. None of these
//! errors ever reach a caller of [`DecisionEngine::decide`]; every path
//! terminates in a well-formed deny with an `internal_error:`-prefixed reason
//! so operators can tell outages from legitimate denials in the audit trail.
//!
//! [`DecisionEngine::decide`]: crate::engine::DecisionEngine::decide

use thiserror::Error;

/// Decision engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Role store unreachable or returned an error (fail closed)
    #[error("Role lookup failed: {0}")]
    RoleLookup(String),

    /// Attribute store unreachable or returned an error (fail open)
    #[error("Attribute lookup failed: {0}")]
    AttributeLookup(String),

    /// Risk service returned a non-2xx response or malformed body
    #[error("Risk service error: {0}")]
    RiskService(String),

    /// Risk service did not answer within the hard timeout
    #[error("Risk service timed out after {0:?}")]
    RiskServiceTimeout(std::time::Duration),

    /// Decision cache unavailable (bypass, never fail the request)
    #[error("Cache error: {0}")]
    Cache(String),

    /// Audit sink rejected the record (log and continue)
    #[error("Audit write failed: {0}")]
    Audit(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for decision engine operations
pub type Result<T> = std::result::Result<T, AuthzError>;
