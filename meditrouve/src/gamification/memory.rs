//! In-memory [`PointsStore`] backed by a single async lock.
//!
//! Every trait method takes the lock once for its whole duration, which
//! gives the same all-or-nothing behaviour the PostgreSQL backend gets from
//! transactions and row locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{cmp::Reverse, collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use super::{
    errors::{GamificationError, GamificationResult},
    models::{
        ClaimedReward, LedgerUpdate, NewPointEntry, NewReward, PointCredit, PointEntry, Reward,
        RewardId, UserId, UserPoints, UserReward, Window,
    },
    rules::{self, plan_redemption},
    store::PointsStore,
};

#[derive(Debug, Default)]
struct State {
    ledgers: HashMap<UserId, UserPoints>,
    entries: Vec<PointEntry>,
    rewards: Vec<Reward>,
    claims: Vec<UserReward>,
    next_ledger_id: i64,
    next_entry_id: i64,
    next_reward_id: i64,
    next_claim_id: i64,
}

impl State {
    fn push_entry(
        &mut self,
        user_id: UserId,
        entry: &NewPointEntry,
        total_after: i64,
        now: DateTime<Utc>,
    ) {
        self.next_entry_id += 1;
        self.entries.push(PointEntry {
            id: self.next_entry_id,
            user_id,
            amount: entry.amount,
            total_after,
            kind: entry.kind,
            reason: entry.reason.clone(),
            created_at: now,
        });
    }

    fn reward(&self, reward_id: RewardId) -> Option<&Reward> {
        self.rewards.iter().find(|r| r.id == reward_id)
    }

    fn reset_with(
        &mut self,
        now: DateTime<Utc>,
        counter: impl Fn(&mut UserPoints) -> &mut i64,
    ) -> u64 {
        let mut touched = 0;
        for ledger in self.ledgers.values_mut() {
            let value = counter(ledger);
            if *value == 0 {
                continue;
            }
            *value = 0;
            ledger.version += 1;
            ledger.updated_at = now;
            touched += 1;
        }
        touched
    }
}

/// In-memory points store
#[derive(Debug, Clone, Default)]
pub struct MemoryPointsStore {
    state: Arc<RwLock<State>>,
}

impl MemoryPointsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a catalog entry, returning it with its assigned id
    pub async fn insert_reward(&self, reward: NewReward) -> Reward {
        let mut state = self.state.write().await;
        state.next_reward_id += 1;
        let reward = Reward {
            id: state.next_reward_id,
            name: reward.name,
            description: reward.description,
            reward_type: reward.reward_type,
            points_cost: reward.points_cost,
            premium_days: reward.premium_days,
            badge_icon: reward.badge_icon,
            is_active: true,
        };
        state.rewards.push(reward.clone());
        reward
    }

    /// Retire a catalog entry; existing claims stay
    pub async fn deactivate_reward(&self, reward_id: RewardId) -> bool {
        let mut state = self.state.write().await;
        match state.rewards.iter_mut().find(|r| r.id == reward_id) {
            Some(reward) => {
                reward.is_active = false;
                true
            }
            None => false,
        }
    }

    /// Seed a ledger row as-is (imports, fixtures)
    ///
    /// The row keeps its counters but gets a fresh id in creation order.
    pub async fn insert_ledger(&self, mut ledger: UserPoints) -> UserPoints {
        let mut state = self.state.write().await;
        state.next_ledger_id += 1;
        ledger.id = state.next_ledger_id;
        state.ledgers.insert(ledger.user_id, ledger.clone());
        ledger
    }

    /// Number of claims recorded for a user and reward
    pub async fn claim_count(&self, user_id: UserId, reward_id: RewardId) -> usize {
        let state = self.state.read().await;
        state
            .claims
            .iter()
            .filter(|c| c.user_id == user_id && c.reward_id == reward_id)
            .count()
    }
}

#[async_trait]
impl PointsStore for MemoryPointsStore {
    async fn find_ledger(&self, user_id: UserId) -> GamificationResult<Option<UserPoints>> {
        Ok(self.state.read().await.ledgers.get(&user_id).cloned())
    }

    async fn get_or_create_ledger(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> GamificationResult<UserPoints> {
        if let Some(ledger) = self.find_ledger(user_id).await? {
            return Ok(ledger);
        }

        let mut state = self.state.write().await;
        if let Some(ledger) = state.ledgers.get(&user_id) {
            return Ok(ledger.clone());
        }
        state.next_ledger_id += 1;
        let ledger = UserPoints::empty(state.next_ledger_id, user_id, now);
        state.ledgers.insert(user_id, ledger.clone());
        Ok(ledger)
    }

    async fn compare_and_swap(
        &self,
        user_id: UserId,
        expected_version: i64,
        update: &LedgerUpdate,
        entry: &NewPointEntry,
        now: DateTime<Utc>,
    ) -> GamificationResult<Option<UserPoints>> {
        let mut state = self.state.write().await;
        let current = state
            .ledgers
            .get(&user_id)
            .ok_or(GamificationError::LedgerNotFound(user_id))?;
        if current.version != expected_version {
            return Ok(None);
        }

        let updated = update.applied_to(current, now);
        state.ledgers.insert(user_id, updated.clone());
        state.push_entry(user_id, entry, updated.total_points, now);
        Ok(Some(updated))
    }

    async fn credit_all(
        &self,
        credits: &[PointCredit],
        now: DateTime<Utc>,
    ) -> GamificationResult<Vec<UserPoints>> {
        let mut state = self.state.write().await;

        // stage everything so a failing credit leaves the state untouched
        let mut staged: HashMap<UserId, UserPoints> = HashMap::new();
        let mut next_ledger_id = state.next_ledger_id;
        let mut credited = Vec::with_capacity(credits.len());
        for credit in credits {
            let current = staged
                .get(&credit.user_id)
                .or_else(|| state.ledgers.get(&credit.user_id));
            let ledger = match current {
                Some(ledger) => ledger.clone(),
                None => {
                    next_ledger_id += 1;
                    UserPoints::empty(next_ledger_id, credit.user_id, now)
                }
            };
            let updated = rules::credit(&ledger, credit.entry.amount)?.applied_to(&ledger, now);
            staged.insert(credit.user_id, updated.clone());
            credited.push(updated);
        }

        state.next_ledger_id = next_ledger_id;
        for (credit, updated) in credits.iter().zip(&credited) {
            state.push_entry(credit.user_id, &credit.entry, updated.total_points, now);
        }
        state.ledgers.extend(staged);
        Ok(credited)
    }

    async fn history(&self, user_id: UserId, limit: i64) -> GamificationResult<Vec<PointEntry>> {
        let state = self.state.read().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn reset_weekly(&self, now: DateTime<Utc>) -> GamificationResult<u64> {
        let mut state = self.state.write().await;
        Ok(state.reset_with(now, |ledger| &mut ledger.weekly_points))
    }

    async fn reset_monthly(&self, now: DateTime<Utc>) -> GamificationResult<u64> {
        let mut state = self.state.write().await;
        Ok(state.reset_with(now, |ledger| &mut ledger.monthly_points))
    }

    async fn top_ledgers(
        &self,
        window: Window,
        limit: i64,
    ) -> GamificationResult<Vec<UserPoints>> {
        let state = self.state.read().await;
        let mut ledgers: Vec<&UserPoints> = state.ledgers.values().collect();
        ledgers.sort_by_key(|l| (Reverse(l.points_in(window)), l.id));
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(ledgers.into_iter().take(limit).cloned().collect())
    }

    async fn count_above(&self, window: Window, points: i64) -> GamificationResult<i64> {
        let state = self.state.read().await;
        let count = state
            .ledgers
            .values()
            .filter(|l| l.points_in(window) > points)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn active_rewards(&self) -> GamificationResult<Vec<Reward>> {
        let state = self.state.read().await;
        let mut rewards: Vec<Reward> = state
            .rewards
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect();
        rewards.sort_by_key(|r| (r.points_cost, r.id));
        Ok(rewards)
    }

    async fn find_active_reward(&self, reward_id: RewardId) -> GamificationResult<Option<Reward>> {
        let state = self.state.read().await;
        Ok(state.reward(reward_id).filter(|r| r.is_active).cloned())
    }

    async fn claimed_rewards(&self, user_id: UserId) -> GamificationResult<Vec<ClaimedReward>> {
        let state = self.state.read().await;
        Ok(state
            .claims
            .iter()
            .filter(|c| c.user_id == user_id)
            .filter_map(|claim| {
                state.reward(claim.reward_id).map(|reward| ClaimedReward {
                    claim: claim.clone(),
                    reward: reward.clone(),
                })
            })
            .collect())
    }

    async fn redeem(
        &self,
        user_id: UserId,
        reward: &Reward,
        now: DateTime<Utc>,
    ) -> GamificationResult<UserReward> {
        let mut state = self.state.write().await;
        let ledger = state
            .ledgers
            .get(&user_id)
            .ok_or(GamificationError::LedgerNotFound(user_id))?;

        let user_claims = state.claims.iter().filter(|c| c.user_id == user_id);
        let holds_badge = user_claims.clone().any(|c| c.reward_id == reward.id);
        let latest_active_premium = user_claims
            .filter_map(|c| c.expires_at)
            .filter(|expires| *expires > now)
            .max();

        let plan = plan_redemption(ledger, reward, holds_badge, latest_active_premium, now)?;

        let updated = plan.update.applied_to(ledger, now);
        state.ledgers.insert(user_id, updated.clone());
        state.push_entry(user_id, &plan.entry, updated.total_points, now);

        state.next_claim_id += 1;
        let claim = UserReward {
            id: state.next_claim_id,
            user_id,
            reward_id: reward.id,
            claimed_at: now,
            expires_at: plan.expires_at,
        };
        state.claims.push(claim.clone());
        Ok(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamification::models::{EntryKind, RewardType};

    fn badge(cost: i64) -> NewReward {
        NewReward {
            name: "Sentinelle".to_string(),
            description: "Badge de fidelite".to_string(),
            reward_type: RewardType::Badge,
            points_cost: cost,
            premium_days: None,
            badge_icon: Some("shield".to_string()),
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = MemoryPointsStore::new();
        let now = Utc::now();
        let first = store.get_or_create_ledger(7, now).await.unwrap();
        let second = store.get_or_create_ledger(7, now).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.total_points, 0);
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let store = MemoryPointsStore::new();
        let now = Utc::now();
        let ledger = store.get_or_create_ledger(1, now).await.unwrap();
        let mut update = ledger.to_update();
        update.total_points = 10;
        let entry = NewPointEntry {
            amount: 10,
            kind: EntryKind::Adjustment,
            reason: "test".to_string(),
        };

        let written = store
            .compare_and_swap(1, ledger.version, &update, &entry, now)
            .await
            .unwrap()
            .expect("first writer wins");
        assert_eq!(written.version, ledger.version + 1);

        let stale = store
            .compare_and_swap(1, ledger.version, &update, &entry, now)
            .await
            .unwrap();
        assert!(stale.is_none());
        assert_eq!(store.history(1, 10).await.unwrap().len(), 1);
    }

    fn credit(user_id: UserId, amount: i64) -> PointCredit {
        PointCredit {
            user_id,
            entry: NewPointEntry {
                amount,
                kind: EntryKind::Referral,
                reason: "REFERRAL".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_credit_all_applies_in_order() {
        let store = MemoryPointsStore::new();
        let now = Utc::now();
        store.get_or_create_ledger(1, now).await.unwrap();

        let credited = store
            .credit_all(&[credit(1, 50), credit(2, 25), credit(1, 10)], now)
            .await
            .unwrap();
        let totals: Vec<i64> = credited.iter().map(|l| l.total_points).collect();
        assert_eq!(totals, vec![50, 25, 60]);

        let first = store.find_ledger(1).await.unwrap().unwrap();
        assert_eq!(first.total_points, 60);
        assert_eq!(first.version, 2);
        assert_eq!(store.find_ledger(2).await.unwrap().unwrap().total_points, 25);
        assert_eq!(store.history(1, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_credit_all_is_all_or_nothing() {
        let store = MemoryPointsStore::new();
        let now = Utc::now();

        let err = store
            .credit_all(&[credit(1, 50), credit(2, -1)], now)
            .await
            .unwrap_err();
        assert!(matches!(err, GamificationError::InvalidAmount(-1)));

        assert!(store.find_ledger(1).await.unwrap().is_none());
        assert!(store.find_ledger(2).await.unwrap().is_none());
        assert!(store.history(1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_bumps_version() {
        let store = MemoryPointsStore::new();
        let now = Utc::now();
        store
            .insert_ledger(UserPoints {
                weekly_points: 40,
                monthly_points: 40,
                total_points: 40,
                ..UserPoints::empty(0, 3, now)
            })
            .await;

        assert_eq!(store.reset_weekly(now).await.unwrap(), 1);
        let ledger = store.find_ledger(3).await.unwrap().unwrap();
        assert_eq!(ledger.weekly_points, 0);
        assert_eq!(ledger.monthly_points, 40);
        assert_eq!(ledger.version, 1);
    }

    #[tokio::test]
    async fn test_inactive_rewards_are_hidden() {
        let store = MemoryPointsStore::new();
        let reward = store.insert_reward(badge(10)).await;
        assert!(store.find_active_reward(reward.id).await.unwrap().is_some());

        assert!(store.deactivate_reward(reward.id).await);
        assert!(store.find_active_reward(reward.id).await.unwrap().is_none());
        assert!(store.active_rewards().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redeem_without_ledger_fails() {
        let store = MemoryPointsStore::new();
        let reward = store.insert_reward(badge(0)).await;
        let err = store.redeem(99, &reward, Utc::now()).await.unwrap_err();
        assert!(matches!(err, GamificationError::LedgerNotFound(99)));
    }
}
