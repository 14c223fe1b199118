//! Reward catalog and redemption.

use chrono::{DateTime, Utc};
use std::{collections::HashSet, sync::Arc};

use super::{
    errors::{GamificationError, GamificationResult},
    models::{ActiveReward, ClaimedReward, RewardId, RewardList, RewardListing, UserId},
    store::PointsStore,
};
use crate::premium::{PremiumGrantor, PremiumSource};

/// Reward manager
#[derive(Clone)]
pub struct RewardManager {
    store: Arc<dyn PointsStore>,
    grantor: Arc<dyn PremiumGrantor>,
}

impl RewardManager {
    pub fn new(store: Arc<dyn PointsStore>, grantor: Arc<dyn PremiumGrantor>) -> Self {
        Self { store, grantor }
    }

    /// Active catalog, annotated for `user_id` when given
    ///
    /// Anonymous callers see every reward as not claimable and a balance of 0.
    pub async fn list_rewards(&self, user_id: Option<UserId>) -> GamificationResult<RewardList> {
        let rewards = self.store.active_rewards().await?;

        let Some(user_id) = user_id else {
            return Ok(RewardList {
                rewards: rewards
                    .into_iter()
                    .map(|reward| RewardListing {
                        reward,
                        can_claim: false,
                        already_claimed: false,
                    })
                    .collect(),
                user_points: 0,
            });
        };

        let ledger = self.store.get_or_create_ledger(user_id, Utc::now()).await?;
        let claimed: HashSet<RewardId> = self
            .store
            .claimed_rewards(user_id)
            .await?
            .iter()
            .map(|c| c.reward.id)
            .collect();

        let rewards = rewards
            .into_iter()
            .map(|reward| {
                let already_claimed = claimed.contains(&reward.id);
                let can_claim = ledger.total_points >= reward.points_cost
                    && !(reward.reward_type.is_badge() && already_claimed);
                RewardListing {
                    reward,
                    can_claim,
                    already_claimed,
                }
            })
            .collect();

        Ok(RewardList {
            rewards,
            user_points: ledger.total_points,
        })
    }

    /// Spend points on a catalog reward
    pub async fn claim_reward(
        &self,
        user_id: UserId,
        reward_id: RewardId,
    ) -> GamificationResult<ClaimedReward> {
        self.claim_reward_at(user_id, reward_id, Utc::now()).await
    }

    pub async fn claim_reward_at(
        &self,
        user_id: UserId,
        reward_id: RewardId,
        now: DateTime<Utc>,
    ) -> GamificationResult<ClaimedReward> {
        let reward = self
            .store
            .find_active_reward(reward_id)
            .await?
            .ok_or(GamificationError::RewardNotFound(reward_id))?;

        // an unknown user fails the balance check rather than LedgerNotFound
        self.store.get_or_create_ledger(user_id, now).await?;
        let claim = self.store.redeem(user_id, &reward, now).await?;

        log::info!(
            "User {} claimed reward {} ({}) for {} points",
            user_id,
            reward.id,
            reward.reward_type,
            reward.points_cost
        );

        if let Some(until) = claim.expires_at {
            if let Err(e) = self
                .grantor
                .grant_premium_until(user_id, until, PremiumSource::Reward)
                .await
            {
                log::error!(
                    "Premium grant for claim {} of user {} failed: {}",
                    claim.id,
                    user_id,
                    e
                );
                return Err(GamificationError::PremiumPending {
                    claim_id: claim.id,
                    source: e,
                });
            }
        }

        Ok(ClaimedReward { claim, reward })
    }

    /// Push the user's furthest running premium claim to billing again
    ///
    /// Grants never shorten an entitlement, so this is safe to repeat after a
    /// [`PremiumPending`](GamificationError::PremiumPending) failure. Returns
    /// the expiry sent, or `None` when no premium claim is running.
    pub async fn resync_premium(
        &self,
        user_id: UserId,
    ) -> GamificationResult<Option<DateTime<Utc>>> {
        self.resync_premium_at(user_id, Utc::now()).await
    }

    pub async fn resync_premium_at(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> GamificationResult<Option<DateTime<Utc>>> {
        let until = self
            .store
            .claimed_rewards(user_id)
            .await?
            .iter()
            .filter_map(|c| c.claim.expires_at)
            .filter(|expires| *expires > now)
            .max();

        if let Some(until) = until {
            self.grantor
                .grant_premium_until(user_id, until, PremiumSource::Reward)
                .await?;
            log::info!("Premium of user {} resynced until {}", user_id, until);
        }
        Ok(until)
    }

    /// The user's claims that are still in force
    pub async fn active_rewards(&self, user_id: UserId) -> GamificationResult<Vec<ActiveReward>> {
        self.active_rewards_at(user_id, Utc::now()).await
    }

    pub async fn active_rewards_at(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> GamificationResult<Vec<ActiveReward>> {
        let claimed = self.store.claimed_rewards(user_id).await?;
        Ok(ActiveReward::active_at(claimed, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gamification::{
            config::PointsConfig,
            engine::PointsEngine,
            memory::MemoryPointsStore,
            models::{NewReward, Reward, RewardType},
        },
        premium::{MemoryPremiumGrantor, PremiumError, PremiumResult},
    };
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

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
        engine: PointsEngine,
        rewards: RewardManager,
        store: MemoryPointsStore,
        grantor: MemoryPremiumGrantor,
    }

    fn fixture() -> Fixture {
        let store = MemoryPointsStore::new();
        let grantor = MemoryPremiumGrantor::new();
        let shared: Arc<dyn PointsStore> = Arc::new(store.clone());
        Fixture {
            engine: PointsEngine::new(shared.clone(), PointsConfig::utc()),
            rewards: RewardManager::new(shared, Arc::new(grantor.clone())),
            store,
            grantor,
        }
    }

    async fn add(
        store: &MemoryPointsStore,
        reward_type: RewardType,
        cost: i64,
        days: Option<i32>,
    ) -> Reward {
        store
            .insert_reward(NewReward {
                name: format!("{reward_type} {cost}"),
                description: String::new(),
                reward_type,
                points_cost: cost,
                premium_days: days,
                badge_icon: None,
            })
            .await
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_listing_marks_claimable_and_claimed() {
        let f = fixture();
        let badge = add(&f.store, RewardType::Badge, 50, None).await;
        let week = add(&f.store, RewardType::PremiumWeek, 200, Some(7)).await;
        f.engine.add_points(1, 120, "seed").await.unwrap();
        f.rewards.claim_reward(1, badge.id).await.unwrap();

        let list = f.rewards.list_rewards(Some(1)).await.unwrap();
        assert_eq!(list.user_points, 70);
        assert_eq!(list.rewards.len(), 2);

        let badge_line = &list.rewards[0];
        assert_eq!(badge_line.reward.id, badge.id);
        assert!(badge_line.already_claimed);
        assert!(!badge_line.can_claim);

        let week_line = &list.rewards[1];
        assert_eq!(week_line.reward.id, week.id);
        assert!(!week_line.already_claimed);
        assert!(!week_line.can_claim);
    }

    #[tokio::test]
    async fn test_anonymous_listing() {
        let f = fixture();
        add(&f.store, RewardType::Badge, 0, None).await;
        let list = f.rewards.list_rewards(None).await.unwrap();
        assert_eq!(list.user_points, 0);
        assert!(!list.rewards[0].can_claim);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_rewards_are_not_found() {
        let f = fixture();
        let retired = add(&f.store, RewardType::Badge, 10, None).await;
        f.store.deactivate_reward(retired.id).await;

        for reward_id in [retired.id, 404] {
            let err = f.rewards.claim_reward(1, reward_id).await.unwrap_err();
            assert!(matches!(err, GamificationError::RewardNotFound(id) if id == reward_id));
        }
    }

    #[tokio::test]
    async fn test_new_user_gets_insufficient_points() {
        let f = fixture();
        let week = add(&f.store, RewardType::PremiumWeek, 60, Some(7)).await;
        let err = f.rewards.claim_reward(5, week.id).await.unwrap_err();
        assert_eq!(err.shortfall(), Some(60));
    }

    #[tokio::test]
    async fn test_premium_claims_stack_and_notify_billing() {
        let f = fixture();
        let week = add(&f.store, RewardType::PremiumWeek, 60, Some(7)).await;
        f.engine.add_points(1, 150, "seed").await.unwrap();

        let first = f.rewards.claim_reward_at(1, week.id, now()).await.unwrap();
        let second = f.rewards.claim_reward_at(1, week.id, now()).await.unwrap();

        assert_eq!(first.claim.expires_at, Some(now() + TimeDelta::days(7)));
        assert_eq!(second.claim.expires_at, Some(now() + TimeDelta::days(14)));
        assert_eq!(
            f.grantor.premium_until(1).await,
            Some(now() + TimeDelta::days(14))
        );

        let ledger = f.store.find_ledger(1).await.unwrap().unwrap();
        assert_eq!(ledger.total_points, 30);
        // earned counters are untouched by spending
        assert_eq!(ledger.weekly_points, 150);

        let active = f.rewards.active_rewards_at(1, now()).await.unwrap();
        assert_eq!(active.len(), 2);
        let later = f
            .rewards
            .active_rewards_at(1, now() + TimeDelta::days(10))
            .await
            .unwrap();
        assert_eq!(later.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_premium_grant_is_reported_and_replayable() {
        let store = MemoryPointsStore::new();
        let grantor = Arc::new(FlakyGrantor::default());
        grantor.down.store(true, Ordering::SeqCst);
        let shared: Arc<dyn PointsStore> = Arc::new(store.clone());
        let engine = PointsEngine::new(shared.clone(), PointsConfig::utc());
        let rewards = RewardManager::new(shared, grantor.clone());

        let week = add(&store, RewardType::PremiumWeek, 60, Some(7)).await;
        engine.add_points(1, 100, "seed").await.unwrap();

        let err = rewards.claim_reward_at(1, week.id, now()).await.unwrap_err();
        assert!(err.is_transient());
        let claim_id = match err {
            GamificationError::PremiumPending { claim_id, .. } => claim_id,
            other => panic!("expected PremiumPending, got {other:?}"),
        };
        // the claim itself stands
        assert_eq!(store.claim_count(1, week.id).await, 1);
        assert_eq!(store.find_ledger(1).await.unwrap().unwrap().total_points, 40);
        assert!(grantor.inner.grants().await.is_empty());

        let err = rewards.resync_premium_at(1, now()).await.unwrap_err();
        assert!(matches!(err, GamificationError::Premium(_)));

        grantor.down.store(false, Ordering::SeqCst);
        let until = rewards.resync_premium_at(1, now()).await.unwrap();
        assert_eq!(until, Some(now() + TimeDelta::days(7)));
        assert_eq!(grantor.inner.premium_until(1).await, until);

        let active = rewards.active_rewards_at(1, now()).await.unwrap();
        assert_eq!(active[0].claim_id, claim_id);
    }

    #[tokio::test]
    async fn test_resync_without_running_premium_is_a_noop() {
        let f = fixture();
        assert_eq!(f.rewards.resync_premium(1).await.unwrap(), None);
        assert!(f.grantor.grants().await.is_empty());
    }

    #[tokio::test]
    async fn test_badge_claim_does_not_notify_billing() {
        let f = fixture();
        let badge = add(&f.store, RewardType::Badge, 10, None).await;
        f.engine.add_points(1, 10, "seed").await.unwrap();

        let claimed = f.rewards.claim_reward(1, badge.id).await.unwrap();
        assert_eq!(claimed.claim.expires_at, None);
        assert!(f.grantor.grants().await.is_empty());

        let history = f.engine.history(1, 10).await.unwrap();
        assert_eq!(history[0].amount, -10);
        assert_eq!(history[0].total_after, 0);
    }
}
