//! Storage seam for the points ledger, history and reward catalog.
//!
//! The engines only talk to the data store through [`PointsStore`], so the
//! same business rules run against PostgreSQL in production and against the
//! in-memory backend in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    errors::GamificationResult,
    models::{
        ClaimedReward, LedgerUpdate, NewPointEntry, PointCredit, PointEntry, Reward, RewardId,
        UserId, UserPoints, UserReward, Window,
    },
};

/// Trait for points ledger repository operations
#[async_trait]
pub trait PointsStore: Send + Sync {
    /// Fetch a ledger without creating it
    async fn find_ledger(&self, user_id: UserId) -> GamificationResult<Option<UserPoints>>;

    /// Fetch a ledger, creating an empty one on first access
    async fn get_or_create_ledger(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> GamificationResult<UserPoints>;

    /// Write `update` and `entry` atomically if the ledger is still at `expected_version`
    ///
    /// Returns `None` when another writer got there first.
    async fn compare_and_swap(
        &self,
        user_id: UserId,
        expected_version: i64,
        update: &LedgerUpdate,
        entry: &NewPointEntry,
        now: DateTime<Utc>,
    ) -> GamificationResult<Option<UserPoints>>;

    /// Apply every credit, or none of them
    ///
    /// Missing ledgers are created. Returns each ledger as it stood right
    /// after its own credit, in input order.
    async fn credit_all(
        &self,
        credits: &[PointCredit],
        now: DateTime<Utc>,
    ) -> GamificationResult<Vec<UserPoints>>;

    /// Newest history rows first
    async fn history(&self, user_id: UserId, limit: i64) -> GamificationResult<Vec<PointEntry>>;

    /// Zero every weekly counter, returning the number of ledgers touched
    async fn reset_weekly(&self, now: DateTime<Utc>) -> GamificationResult<u64>;

    /// Zero every monthly counter, returning the number of ledgers touched
    async fn reset_monthly(&self, now: DateTime<Utc>) -> GamificationResult<u64>;

    /// Top ledgers by the window's counter, ties in creation order
    async fn top_ledgers(&self, window: Window, limit: i64)
    -> GamificationResult<Vec<UserPoints>>;

    /// Number of ledgers whose window counter is strictly above `points`
    async fn count_above(&self, window: Window, points: i64) -> GamificationResult<i64>;

    /// Active catalog, cheapest first
    async fn active_rewards(&self) -> GamificationResult<Vec<Reward>>;

    /// Active catalog entry by id
    async fn find_active_reward(&self, reward_id: RewardId) -> GamificationResult<Option<Reward>>;

    /// All claims of a user with their catalog entries, oldest first
    async fn claimed_rewards(&self, user_id: UserId) -> GamificationResult<Vec<ClaimedReward>>;

    /// Spend points on `reward` in one atomic unit
    ///
    /// Implementations must, under a single lock or transaction:
    /// re-check the balance (`InsufficientPoints`), reject a second claim of
    /// a badge (`AlreadyClaimed`), stack premium expiry after any running
    /// grant, debit `total_points` and recompute the level, insert the claim
    /// and write a `REDEMPTION` history row.
    async fn redeem(
        &self,
        user_id: UserId,
        reward: &Reward,
        now: DateTime<Utc>,
    ) -> GamificationResult<UserReward>;
}
