//! Referral data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::gamification::{AddPointsOutcome, UnknownVariant, UserId};

/// A user's shareable referral code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralCode {
    pub id: i64,
    pub user_id: UserId,
    /// Always stored upper-case
    pub code: String,
    pub created_at: DateTime<Utc>,
}

/// Referrer to referee edge; at most one per referee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referral {
    pub id: i64,
    pub code_id: i64,
    pub referrer_id: UserId,
    pub referee_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// How both parties are rewarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralPolicy {
    /// Points through the ledger
    #[default]
    Points,
    /// One month of premium each
    Premium,
}

impl ReferralPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferralPolicy::Points => "points",
            ReferralPolicy::Premium => "premium",
        }
    }
}

impl fmt::Display for ReferralPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferralPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "points" => Ok(ReferralPolicy::Points),
            "premium" => Ok(ReferralPolicy::Premium),
            _ => Err(UnknownVariant::new("referral policy", s)),
        }
    }
}

/// What each party got for a referral
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReferralReward {
    Points {
        referrer: AddPointsOutcome,
        referee: AddPointsOutcome,
    },
    Premium {
        until: DateTime<Utc>,
    },
}

/// Result of applying a referral code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedReferral {
    pub referral: Referral,
    pub reward: ReferralReward,
    pub message: &'static str,
}

/// One rung of the referral milestone ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralMilestone {
    pub referrals: i64,
    pub reward: &'static str,
    pub achieved: bool,
}

/// Referral dashboard for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralStats {
    pub referral_code: String,
    pub total_referrals: i64,
    pub points_earned: i64,
    pub points_per_referral: i64,
    pub milestones: Vec<ReferralMilestone>,
}
