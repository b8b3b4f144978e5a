//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{RemaError, Result, constants};

/// Tunables for a settlement node. Every field has a default, so a config
/// file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Credited to every new account at enrollment.
    pub onboarding_grant_atomic: u64,
    /// Canonical message layouts this node will verify.
    pub accepted_protocol_versions: Vec<u8>,
    /// ISO 4217 numeric code used for ledger-originated entries.
    pub default_currency_code: u16,
    /// Minor-unit exponent, display only.
    pub currency_decimals: u32,
    /// Replay strikes per sender before rejected attempts are flagged.
    pub replay_flag_threshold: u32,
    /// Largest batch a merchant may upload at once.
    pub max_batch_items: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            onboarding_grant_atomic: constants::DEFAULT_ONBOARDING_GRANT,
            accepted_protocol_versions: constants::DEFAULT_PROTOCOL_VERSIONS.to_vec(),
            default_currency_code: constants::DEFAULT_CURRENCY_CODE,
            currency_decimals: constants::DEFAULT_CURRENCY_DECIMALS,
            replay_flag_threshold: constants::DEFAULT_REPLAY_FLAG_THRESHOLD,
            max_batch_items: constants::DEFAULT_MAX_BATCH_ITEMS,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| RemaError::Configuration(format!("invalid engine config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.accepted_protocol_versions.is_empty() {
            return Err(RemaError::Configuration(
                "accepted_protocol_versions must not be empty".into(),
            ));
        }
        for v in &self.accepted_protocol_versions {
            crate::MessageLayout::from_version(*v).map_err(|_| {
                RemaError::Configuration(format!("protocol version {v} has no message layout"))
            })?;
        }
        if self.replay_flag_threshold == 0 {
            return Err(RemaError::Configuration(
                "replay_flag_threshold must be >= 1".into(),
            ));
        }
        if self.max_batch_items == 0 {
            return Err(RemaError::Configuration("max_batch_items must be >= 1".into()));
        }
        if self.currency_decimals > 8 {
            return Err(RemaError::Configuration(format!(
                "currency_decimals {} out of range",
                self.currency_decimals
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn accepts_version(&self, version: u8) -> bool {
        self.accepted_protocol_versions.contains(&version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.onboarding_grant_atomic, 50_000);
        assert_eq!(cfg.default_currency_code, 952);
        assert!(cfg.accepts_version(1));
        assert!(cfg.accepts_version(2));
        assert!(!cfg.accepts_version(3));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"onboarding_grant_atomic": 0}"#).unwrap();
        assert_eq!(cfg.onboarding_grant_atomic, 0);
        assert_eq!(cfg.max_batch_items, constants::DEFAULT_MAX_BATCH_ITEMS);
    }

    #[test]
    fn unknown_protocol_version_rejected() {
        let err =
            EngineConfig::from_json_str(r#"{"accepted_protocol_versions": [1, 7]}"#).unwrap_err();
        assert!(matches!(err, RemaError::Configuration(_)));
    }

    #[test]
    fn zero_threshold_rejected() {
        let cfg = EngineConfig {
            replay_flag_threshold: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_json_is_configuration_error() {
        let err = EngineConfig::from_json_str("{not json").unwrap_err();
        assert!(err.to_string().starts_with("REMA_ERR_902"));
    }
}
