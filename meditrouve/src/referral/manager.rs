//! Referral codes, edges and rewards.

use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::{
    config::ReferralConfig,
    errors::{ReferralError, ReferralResult},
    models::{
        AppliedReferral, Referral, ReferralCode, ReferralMilestone, ReferralPolicy,
        ReferralReward, ReferralStats,
    },
    store::ReferralStore,
};
use crate::{
    gamification::{EntryKind, NewPointEntry, PointCredit, PointsEngine, UserId},
    premium::{PremiumGrantor, PremiumSource},
};

pub const CODE_PREFIX: &str = "MT";
pub const MAX_CODE_ATTEMPTS: u32 = 8;

pub const REFERRER_POINTS: i64 = 50;
pub const REFEREE_POINTS: i64 = 25;
pub const REFERRER_REASON: &str = "REFERRAL";
pub const REFEREE_REASON: &str = "REFERRAL_BONUS";
pub const PREMIUM_REFERRAL_DAYS: i64 = 30;

const POINTS_MESSAGE: &str = "Parrainage valide ! +25 points";
const PREMIUM_MESSAGE: &str = "1 mois Premium active !";

/// Milestone ladder shown on the referral dashboard
pub const MILESTONES: [(i64, &str); 4] = [
    (1, "+50 points"),
    (5, "+100 points bonus"),
    (10, "1 mois Premium gratuit"),
    (25, "Badge Ambassadeur"),
];

/// Candidate code for `user_id` on the given attempt
///
/// `MT` followed by the first 8 hex digits, upper-case, of
/// SHA-256(`user_id:salt:attempt`).
pub fn derive_code(user_id: UserId, salt: &str, attempt: u32) -> String {
    let digest = Sha256::digest(format!("{user_id}:{salt}:{attempt}").as_bytes());
    let hex = hex::encode_upper(digest);
    format!("{CODE_PREFIX}{}", &hex[..8])
}

/// Canonical form used for storage and lookup
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Referral manager
#[derive(Clone)]
pub struct ReferralManager {
    store: Arc<dyn ReferralStore>,
    points: PointsEngine,
    grantor: Arc<dyn PremiumGrantor>,
    config: ReferralConfig,
}

impl ReferralManager {
    pub fn new(
        store: Arc<dyn ReferralStore>,
        points: PointsEngine,
        grantor: Arc<dyn PremiumGrantor>,
        config: ReferralConfig,
    ) -> Self {
        Self {
            store,
            points,
            grantor,
            config,
        }
    }

    pub fn policy(&self) -> ReferralPolicy {
        self.config.policy
    }

    /// The user's code, issued on first request
    pub async fn get_or_create_code(&self, user_id: UserId) -> ReferralResult<ReferralCode> {
        if let Some(existing) = self.store.find_code_by_user(user_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        for attempt in 0..MAX_CODE_ATTEMPTS {
            let candidate = derive_code(user_id, &self.config.salt, attempt);
            if let Some(code) = self.store.insert_code(user_id, &candidate, now).await? {
                log::info!("Issued referral code {} to user {}", code.code, user_id);
                return Ok(code);
            }
            // a concurrent request may have issued one meanwhile
            if let Some(existing) = self.store.find_code_by_user(user_id).await? {
                return Ok(existing);
            }
            log::debug!("Referral code {} already taken", candidate);
        }

        log::error!(
            "No free referral code for user {} after {} attempts",
            user_id,
            MAX_CODE_ATTEMPTS
        );
        Err(ReferralError::CodeGenerationExhausted)
    }

    /// Whether `code` belongs to someone
    pub async fn validate_code(&self, code: &str) -> ReferralResult<bool> {
        Ok(self.store.find_code(&normalize_code(code)).await?.is_some())
    }

    /// Link `referee_id` to the owner of `code` and reward both
    pub async fn apply_referral(
        &self,
        code: &str,
        referee_id: UserId,
    ) -> ReferralResult<AppliedReferral> {
        self.apply_referral_at(code, referee_id, Utc::now()).await
    }

    pub async fn apply_referral_at(
        &self,
        code: &str,
        referee_id: UserId,
        now: DateTime<Utc>,
    ) -> ReferralResult<AppliedReferral> {
        let record = self
            .store
            .find_code(&normalize_code(code))
            .await?
            .ok_or_else(|| ReferralError::InvalidCode(code.to_string()))?;

        if record.user_id == referee_id {
            return Err(ReferralError::SelfReferral);
        }
        if self
            .store
            .find_referral_by_referee(referee_id)
            .await?
            .is_some()
        {
            return Err(ReferralError::AlreadyReferred(referee_id));
        }

        let referral = self
            .store
            .insert_referral(&record, referee_id, now)
            .await?
            .ok_or(ReferralError::AlreadyReferred(referee_id))?;

        log::info!(
            "User {} referred user {} ({} policy)",
            referral.referrer_id,
            referee_id,
            self.config.policy
        );

        let rewarded = match self.config.policy {
            ReferralPolicy::Points => self
                .pay_points(referral.referrer_id, referee_id, now)
                .await
                .map(|reward| (reward, POINTS_MESSAGE)),
            ReferralPolicy::Premium => self
                .grant_premium(referral.referrer_id, referee_id, now)
                .await
                .map(|reward| (reward, PREMIUM_MESSAGE)),
        };

        let (reward, message) = match rewarded {
            Ok(rewarded) => rewarded,
            Err(e) => {
                log::error!(
                    "Referral rewards for user {} failed, releasing the referral: {}",
                    referee_id,
                    e
                );
                self.release(&referral).await;
                return Err(e);
            }
        };

        Ok(AppliedReferral {
            referral,
            reward,
            message,
        })
    }

    /// Drop an edge whose rewards were not paid so the referee can try again
    async fn release(&self, referral: &Referral) {
        if let Err(e) = self.store.delete_referral(referral.id).await {
            log::error!(
                "Could not release referral {} of user {}: {}",
                referral.id,
                referral.referee_id,
                e
            );
        }
    }

    /// Both credits land together or not at all
    async fn pay_points(
        &self,
        referrer_id: UserId,
        referee_id: UserId,
        now: DateTime<Utc>,
    ) -> ReferralResult<ReferralReward> {
        let credits = [
            (referrer_id, REFERRER_POINTS, REFERRER_REASON),
            (referee_id, REFEREE_POINTS, REFEREE_REASON),
        ]
        .map(|(user_id, amount, reason)| PointCredit {
            user_id,
            entry: NewPointEntry {
                amount,
                kind: EntryKind::Referral,
                reason: reason.to_string(),
            },
        });

        let outcomes = self.points.credit_all_at(&credits, now).await?;
        Ok(ReferralReward::Points {
            referrer: outcomes[0],
            referee: outcomes[1],
        })
    }

    /// Grants are idempotent, so a retry after a partial failure is harmless
    async fn grant_premium(
        &self,
        referrer_id: UserId,
        referee_id: UserId,
        now: DateTime<Utc>,
    ) -> ReferralResult<ReferralReward> {
        let until = now + TimeDelta::days(PREMIUM_REFERRAL_DAYS);
        for user_id in [referrer_id, referee_id] {
            self.grantor
                .grant_premium_until(user_id, until, PremiumSource::Referral)
                .await?;
        }
        Ok(ReferralReward::Premium { until })
    }

    /// Code, counts and milestone ladder for the referral dashboard
    pub async fn referral_stats(&self, user_id: UserId) -> ReferralResult<ReferralStats> {
        let code = self.get_or_create_code(user_id).await?;
        let total_referrals = self.store.count_referrals(user_id).await?;

        let points_per_referral = match self.config.policy {
            ReferralPolicy::Points => REFERRER_POINTS,
            ReferralPolicy::Premium => 0,
        };

        Ok(ReferralStats {
            referral_code: code.code,
            total_referrals,
            points_earned: total_referrals.saturating_mul(points_per_referral),
            points_per_referral,
            milestones: MILESTONES
                .iter()
                .map(|&(referrals, reward)| ReferralMilestone {
                    referrals,
                    reward,
                    achieved: total_referrals >= referrals,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gamification::{
            ClaimedReward, GamificationError, GamificationResult, MemoryPointsStore, PointEntry,
            PointsConfig, PointsStore, Reward, RewardId, UserPoints, UserReward, Window,
            models::LedgerUpdate,
        },
        premium::{MemoryPremiumGrantor, PremiumError, PremiumResult},
        referral::{config::DEFAULT_REFERRAL_SALT, memory::MemoryReferralStore},
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Points store whose writes for one user fail while `failing` is set
    struct FailingFor {
        user_id: UserId,
        failing: AtomicBool,
        inner: MemoryPointsStore,
    }

    impl FailingFor {
        fn check(&self, user_id: UserId) -> GamificationResult<()> {
            if user_id == self.user_id && self.failing.load(Ordering::SeqCst) {
                return Err(GamificationError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PointsStore for FailingFor {
        async fn find_ledger(&self, user_id: UserId) -> GamificationResult<Option<UserPoints>> {
            self.inner.find_ledger(user_id).await
        }

        async fn get_or_create_ledger(
            &self,
            user_id: UserId,
            now: DateTime<Utc>,
        ) -> GamificationResult<UserPoints> {
            self.inner.get_or_create_ledger(user_id, now).await
        }

        async fn compare_and_swap(
            &self,
            user_id: UserId,
            expected_version: i64,
            update: &LedgerUpdate,
            entry: &NewPointEntry,
            now: DateTime<Utc>,
        ) -> GamificationResult<Option<UserPoints>> {
            self.check(user_id)?;
            self.inner
                .compare_and_swap(user_id, expected_version, update, entry, now)
                .await
        }

        async fn credit_all(
            &self,
            credits: &[PointCredit],
            now: DateTime<Utc>,
        ) -> GamificationResult<Vec<UserPoints>> {
            for credit in credits {
                self.check(credit.user_id)?;
            }
            self.inner.credit_all(credits, now).await
        }

        async fn history(
            &self,
            user_id: UserId,
            limit: i64,
        ) -> GamificationResult<Vec<PointEntry>> {
            self.inner.history(user_id, limit).await
        }

        async fn reset_weekly(&self, now: DateTime<Utc>) -> GamificationResult<u64> {
            self.inner.reset_weekly(now).await
        }

        async fn reset_monthly(&self, now: DateTime<Utc>) -> GamificationResult<u64> {
            self.inner.reset_monthly(now).await
        }

        async fn top_ledgers(
            &self,
            window: Window,
            limit: i64,
        ) -> GamificationResult<Vec<UserPoints>> {
            self.inner.top_ledgers(window, limit).await
        }

        async fn count_above(&self, window: Window, points: i64) -> GamificationResult<i64> {
            self.inner.count_above(window, points).await
        }

        async fn active_rewards(&self) -> GamificationResult<Vec<Reward>> {
            self.inner.active_rewards().await
        }

        async fn find_active_reward(
            &self,
            reward_id: RewardId,
        ) -> GamificationResult<Option<Reward>> {
            self.inner.find_active_reward(reward_id).await
        }

        async fn claimed_rewards(
            &self,
            user_id: UserId,
        ) -> GamificationResult<Vec<ClaimedReward>> {
            self.inner.claimed_rewards(user_id).await
        }

        async fn redeem(
            &self,
            user_id: UserId,
            reward: &Reward,
            now: DateTime<Utc>,
        ) -> GamificationResult<UserReward> {
            self.check(user_id)?;
            self.inner.redeem(user_id, reward, now).await
        }
    }

    /// Billing that can be switched off
    #[derive(Default)]
    struct FlakyGrantor {
        down: AtomicBool,
        inner: MemoryPremiumGrantor,
    }

    #[async_trait]
    impl PremiumGrantor for FlakyGrantor {
        async fn grant_premium_until(
            &self,
            user_id: UserId,
            until: DateTime<Utc>,
            source: PremiumSource,
        ) -> PremiumResult<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(PremiumError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.grant_premium_until(user_id, until, source).await
        }
    }

    struct Fixture {
        referrals: ReferralManager,
        points: MemoryPointsStore,
        grantor: MemoryPremiumGrantor,
    }

    fn fixture(policy: ReferralPolicy) -> Fixture {
        let points = MemoryPointsStore::new();
        let grantor = MemoryPremiumGrantor::new();
        let engine = PointsEngine::new(Arc::new(points.clone()), PointsConfig::utc());
        Fixture {
            referrals: ReferralManager::new(
                Arc::new(MemoryReferralStore::new()),
                engine,
                Arc::new(grantor.clone()),
                ReferralConfig::with_policy(policy),
            ),
            points,
            grantor,
        }
    }

    #[test]
    fn test_derived_code_shape() {
        let code = derive_code(42, "salt", 0);
        assert_eq!(code.len(), 10);
        assert!(code.starts_with("MT"));
        assert!(
            code[2..]
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        );
    }

    #[test]
    fn test_derivation_is_deterministic_per_attempt() {
        assert_eq!(derive_code(42, "salt", 0), derive_code(42, "salt", 0));
        assert_ne!(derive_code(42, "salt", 0), derive_code(42, "salt", 1));
        assert_ne!(derive_code(42, "salt", 0), derive_code(42, "pepper", 0));
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  mtab12cd34 "), "MTAB12CD34");
    }

    #[tokio::test]
    async fn test_code_is_issued_once() {
        let f = fixture(ReferralPolicy::Points);
        let first = f.referrals.get_or_create_code(1).await.unwrap();
        let again = f.referrals.get_or_create_code(1).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.code, derive_code(1, DEFAULT_REFERRAL_SALT, 0));
    }

    #[tokio::test]
    async fn test_points_policy_credits_both_parties() {
        let f = fixture(ReferralPolicy::Points);
        let code = f.referrals.get_or_create_code(1).await.unwrap();

        let applied = f
            .referrals
            .apply_referral(&code.code.to_lowercase(), 2)
            .await
            .unwrap();
        assert_eq!(applied.referral.referrer_id, 1);
        assert!(matches!(applied.reward, ReferralReward::Points { .. }));

        let referrer = f.points.find_ledger(1).await.unwrap().unwrap();
        let referee = f.points.find_ledger(2).await.unwrap().unwrap();
        assert_eq!(referrer.total_points, 50);
        assert_eq!(referee.total_points, 25);
        assert!(f.grantor.grants().await.is_empty());
    }

    #[tokio::test]
    async fn test_premium_policy_grants_a_month_each() {
        let f = fixture(ReferralPolicy::Premium);
        let code = f.referrals.get_or_create_code(1).await.unwrap();
        let now = Utc::now();

        f.referrals
            .apply_referral_at(&code.code, 2, now)
            .await
            .unwrap();

        let until = now + TimeDelta::days(30);
        assert_eq!(f.grantor.premium_until(1).await, Some(until));
        assert_eq!(f.grantor.premium_until(2).await, Some(until));
        assert!(f.points.find_ledger(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_referee_credit_pays_nobody_and_can_be_retried() {
        let points = Arc::new(FailingFor {
            user_id: 2,
            failing: AtomicBool::new(true),
            inner: MemoryPointsStore::new(),
        });
        let store = MemoryReferralStore::new();
        let referrals = ReferralManager::new(
            Arc::new(store.clone()),
            PointsEngine::new(points.clone(), PointsConfig::utc()),
            Arc::new(MemoryPremiumGrantor::new()),
            ReferralConfig::default(),
        );
        let code = referrals.get_or_create_code(1).await.unwrap();

        let err = referrals.apply_referral(&code.code, 2).await.unwrap_err();
        assert!(matches!(
            err,
            ReferralError::Points(GamificationError::Database(_))
        ));
        assert!(points.find_ledger(1).await.unwrap().is_none());
        assert!(points.find_ledger(2).await.unwrap().is_none());
        assert!(store.find_referral_by_referee(2).await.unwrap().is_none());

        points.failing.store(false, Ordering::SeqCst);
        referrals.apply_referral(&code.code, 2).await.unwrap();

        let referrer = points.find_ledger(1).await.unwrap().unwrap();
        let referee = points.find_ledger(2).await.unwrap().unwrap();
        assert_eq!(referrer.total_points, 50);
        assert_eq!(referee.total_points, 25);
        assert_eq!(store.count_referrals(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_premium_grant_releases_the_referral() {
        let grantor = Arc::new(FlakyGrantor::default());
        grantor.down.store(true, Ordering::SeqCst);
        let referrals = ReferralManager::new(
            Arc::new(MemoryReferralStore::new()),
            PointsEngine::new(Arc::new(MemoryPointsStore::new()), PointsConfig::utc()),
            grantor.clone(),
            ReferralConfig::with_policy(ReferralPolicy::Premium),
        );
        let code = referrals.get_or_create_code(1).await.unwrap();

        let err = referrals.apply_referral(&code.code, 2).await.unwrap_err();
        assert!(matches!(err, ReferralError::Premium(_)));
        assert!(err.is_transient());

        grantor.down.store(false, Ordering::SeqCst);
        let now = Utc::now();
        referrals
            .apply_referral_at(&code.code, 2, now)
            .await
            .unwrap();

        let until = now + TimeDelta::days(PREMIUM_REFERRAL_DAYS);
        assert_eq!(grantor.inner.premium_until(1).await, Some(until));
        assert_eq!(grantor.inner.premium_until(2).await, Some(until));
    }

    #[tokio::test]
    async fn test_rejections_in_order() {
        let f = fixture(ReferralPolicy::Points);
        let code = f.referrals.get_or_create_code(1).await.unwrap();

        let err = f
            .referrals
            .apply_referral("MTNOPE0000", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::InvalidCode(_)));

        let err = f.referrals.apply_referral(&code.code, 1).await.unwrap_err();
        assert!(matches!(err, ReferralError::SelfReferral));

        f.referrals.apply_referral(&code.code, 2).await.unwrap();
        let err = f.referrals.apply_referral(&code.code, 2).await.unwrap_err();
        assert!(matches!(err, ReferralError::AlreadyReferred(2)));

        // the duplicate paid nothing extra
        let referee = f.points.find_ledger(2).await.unwrap().unwrap();
        assert_eq!(referee.total_points, 25);
    }

    #[tokio::test]
    async fn test_validate_code() {
        let f = fixture(ReferralPolicy::Points);
        let code = f.referrals.get_or_create_code(9).await.unwrap();
        assert!(f.referrals.validate_code(&code.code).await.unwrap());
        let padded = format!(" {} ", code.code.to_lowercase());
        assert!(f.referrals.validate_code(&padded).await.unwrap());
        assert!(!f.referrals.validate_code("MT00000000").await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_ladder() {
        let f = fixture(ReferralPolicy::Points);
        let code = f.referrals.get_or_create_code(1).await.unwrap();
        for referee in 2..7 {
            f.referrals
                .apply_referral(&code.code, referee)
                .await
                .unwrap();
        }

        let stats = f.referrals.referral_stats(1).await.unwrap();
        assert_eq!(stats.referral_code, code.code);
        assert_eq!(stats.total_referrals, 5);
        assert_eq!(stats.points_earned, 250);
        let achieved: Vec<bool> = stats.milestones.iter().map(|m| m.achieved).collect();
        assert_eq!(achieved, vec![true, true, false, false]);
    }
}
