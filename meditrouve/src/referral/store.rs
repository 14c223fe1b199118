//! Storage seam for referral codes and edges.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    errors::ReferralResult,
    models::{Referral, ReferralCode},
};
use crate::gamification::UserId;

/// Trait for referral repository operations
#[async_trait]
pub trait ReferralStore: Send + Sync {
    async fn find_code_by_user(&self, user_id: UserId) -> ReferralResult<Option<ReferralCode>>;

    /// Exact match on the stored upper-case code
    async fn find_code(&self, code: &str) -> ReferralResult<Option<ReferralCode>>;

    /// Store a new code; `None` if the user or the code is already taken
    async fn insert_code(
        &self,
        user_id: UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> ReferralResult<Option<ReferralCode>>;

    async fn find_referral_by_referee(&self, referee_id: UserId)
    -> ReferralResult<Option<Referral>>;

    /// Record the edge; `None` if the referee already has one
    async fn insert_referral(
        &self,
        code: &ReferralCode,
        referee_id: UserId,
        now: DateTime<Utc>,
    ) -> ReferralResult<Option<Referral>>;

    /// Remove an edge whose rewards could not be paid, so the referee can retry
    async fn delete_referral(&self, referral_id: i64) -> ReferralResult<bool>;

    async fn count_referrals(&self, referrer_id: UserId) -> ReferralResult<i64>;
}
