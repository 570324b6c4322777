//! Typed decision context
//!
//! The enforcement points pass free-form JSON; the engine validates it at the
//! boundary into a closed map of recognized keys plus a bounded extension bag,
//! so policy conditions never trust dynamic payloads.

use crate::error::{AuthzError, Result};
use crate::types::KycLevel;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Maximum entries in the extension bag.
const MAX_EXTENSIONS: usize = 16;

/// Recognized context keys, validated at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kyc_level: Option<KycLevel>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,

    /// Caller-supplied risk score override. Honored only when the engine is
    /// configured with `allow_risk_override` (test deployments); production
    /// callers must not rely on it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sira_score: Option<u8>,

    /// Forward-compatibility bag for keys the engine does not interpret.
    /// BTreeMap keeps iteration order stable for canonical hashing.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, String>,
}

impl DecisionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_kyc_level(mut self, level: KycLevel) -> Self {
        self.kyc_level = Some(level);
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn with_sira_score(mut self, score: u8) -> Self {
        self.sira_score = Some(score);
        self
    }

    pub fn with_extension(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Validate a free-form JSON map into a typed context.
    ///
    /// Recognized keys must carry the right type; unrecognized scalar keys
    /// land in the extension bag. Non-scalar extension values and oversized
    /// bags are rejected rather than silently dropped.
    pub fn from_json(raw: &HashMap<String, serde_json::Value>) -> Result<Self> {
        use serde_json::Value;

        let mut ctx = Self::default();

        for (key, value) in raw {
            match key.as_str() {
                "amount" => {
                    let n = value.as_f64().ok_or_else(|| {
                        AuthzError::InvalidInput(format!("amount must be numeric, got {value}"))
                    })?;
                    ctx.amount = Some(n);
                }
                "kyc_level" => {
                    let s = value.as_str().ok_or_else(|| {
                        AuthzError::InvalidInput("kyc_level must be a string".into())
                    })?;
                    let level = s
                        .parse::<KycLevel>()
                        .map_err(AuthzError::InvalidInput)?;
                    ctx.kyc_level = Some(level);
                }
                "country" => {
                    let s = value.as_str().ok_or_else(|| {
                        AuthzError::InvalidInput("country must be a string".into())
                    })?;
                    ctx.country = Some(s.to_string());
                }
                "device_type" => {
                    let s = value.as_str().ok_or_else(|| {
                        AuthzError::InvalidInput("device_type must be a string".into())
                    })?;
                    ctx.device_type = Some(s.to_string());
                }
                "sira_score" => {
                    let n = value.as_u64().filter(|n| *n <= 100).ok_or_else(|| {
                        AuthzError::InvalidInput(format!(
                            "sira_score must be an integer in [0,100], got {value}"
                        ))
                    })?;
                    ctx.sira_score = Some(n as u8);
                }
                other => {
                    let scalar = match value {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => {
                            return Err(AuthzError::InvalidInput(format!(
                                "extension key '{other}' must be a scalar"
                            )))
                        }
                    };
                    ctx.extensions.insert(other.to_string(), scalar);
                }
            }
        }

        if ctx.extensions.len() > MAX_EXTENSIONS {
            return Err(AuthzError::InvalidInput(format!(
                "context carries {} extension keys, limit is {MAX_EXTENSIONS}",
                ctx.extensions.len()
            )));
        }

        Ok(ctx)
    }

    /// Feed a canonical byte representation into a cache-key hasher.
    ///
    /// Field order is fixed and extension keys iterate sorted, so equal
    /// contexts always hash identically.
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        if let Some(amount) = self.amount {
            hasher.update(b"amount");
            hasher.update(&amount.to_bits().to_le_bytes());
        }
        if let Some(level) = self.kyc_level {
            hasher.update(b"kyc_level");
            hasher.update(level.to_string().as_bytes());
        }
        if let Some(country) = &self.country {
            hasher.update(b"country");
            hasher.update(country.as_bytes());
        }
        if let Some(device) = &self.device_type {
            hasher.update(b"device_type");
            hasher.update(device.as_bytes());
        }
        if let Some(score) = self.sira_score {
            hasher.update(b"sira_score");
            hasher.update(&[score]);
        }
        for (k, v) in &self.extensions {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
    }
}
