//! Referral configuration.

use super::models::ReferralPolicy;

/// Salt used when `REFERRAL_SALT` is unset
pub const DEFAULT_REFERRAL_SALT: &str = "meditrouve-referral";

/// Referral configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralConfig {
    /// How both parties are rewarded
    pub policy: ReferralPolicy,

    /// Mixed into code derivation so codes can't be guessed from user ids
    pub salt: String,
}

impl ReferralConfig {
    /// Create configuration from environment variables
    ///
    /// - `REFERRAL_POLICY`: `points` or `premium` (default: `points`)
    /// - `REFERRAL_SALT`: code derivation salt (default: [`DEFAULT_REFERRAL_SALT`])
    pub fn from_env() -> Self {
        let policy = match std::env::var("REFERRAL_POLICY") {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                log::warn!("{}, using the points policy", e);
                ReferralPolicy::Points
            }),
            Err(_) => ReferralPolicy::Points,
        };

        Self {
            policy,
            salt: std::env::var("REFERRAL_SALT")
                .unwrap_or_else(|_| DEFAULT_REFERRAL_SALT.to_string()),
        }
    }

    pub fn with_policy(policy: ReferralPolicy) -> Self {
        Self {
            policy,
            salt: DEFAULT_REFERRAL_SALT.to_string(),
        }
    }
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self::with_policy(ReferralPolicy::Points)
    }
}
