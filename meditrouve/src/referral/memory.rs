//! In-memory [`ReferralStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    errors::ReferralResult,
    models::{Referral, ReferralCode},
    store::ReferralStore,
};
use crate::gamification::UserId;

#[derive(Debug, Default)]
struct State {
    codes: Vec<ReferralCode>,
    referrals: Vec<Referral>,
    next_referral_id: i64,
}

/// In-memory referral store
#[derive(Debug, Clone, Default)]
pub struct MemoryReferralStore {
    state: Arc<RwLock<State>>,
}

impl MemoryReferralStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReferralStore for MemoryReferralStore {
    async fn find_code_by_user(&self, user_id: UserId) -> ReferralResult<Option<ReferralCode>> {
        let state = self.state.read().await;
        Ok(state.codes.iter().find(|c| c.user_id == user_id).cloned())
    }

    async fn find_code(&self, code: &str) -> ReferralResult<Option<ReferralCode>> {
        let state = self.state.read().await;
        Ok(state.codes.iter().find(|c| c.code == code).cloned())
    }

    async fn insert_code(
        &self,
        user_id: UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> ReferralResult<Option<ReferralCode>> {
        let mut state = self.state.write().await;
        if state
            .codes
            .iter()
            .any(|c| c.user_id == user_id || c.code == code)
        {
            return Ok(None);
        }

        let record = ReferralCode {
            id: i64::try_from(state.codes.len()).unwrap_or(i64::MAX) + 1,
            user_id,
            code: code.to_string(),
            created_at: now,
        };
        state.codes.push(record.clone());
        Ok(Some(record))
    }

    async fn find_referral_by_referee(
        &self,
        referee_id: UserId,
    ) -> ReferralResult<Option<Referral>> {
        let state = self.state.read().await;
        Ok(state
            .referrals
            .iter()
            .find(|r| r.referee_id == referee_id)
            .cloned())
    }

    async fn insert_referral(
        &self,
        code: &ReferralCode,
        referee_id: UserId,
        now: DateTime<Utc>,
    ) -> ReferralResult<Option<Referral>> {
        let mut state = self.state.write().await;
        if state.referrals.iter().any(|r| r.referee_id == referee_id) {
            return Ok(None);
        }

        state.next_referral_id += 1;
        let referral = Referral {
            id: state.next_referral_id,
            code_id: code.id,
            referrer_id: code.user_id,
            referee_id,
            created_at: now,
        };
        state.referrals.push(referral.clone());
        Ok(Some(referral))
    }

    async fn delete_referral(&self, referral_id: i64) -> ReferralResult<bool> {
        let mut state = self.state.write().await;
        let before = state.referrals.len();
        state.referrals.retain(|r| r.id != referral_id);
        Ok(state.referrals.len() < before)
    }

    async fn count_referrals(&self, referrer_id: UserId) -> ReferralResult<i64> {
        let state = self.state.read().await;
        let count = state
            .referrals
            .iter()
            .filter(|r| r.referrer_id == referrer_id)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}
