//! Ranked views over the points ledgers.

use std::sync::Arc;

use super::{
    errors::GamificationResult,
    models::{Leaderboard, LeaderboardEntry, UserId, UserRank, Window},
    store::PointsStore,
};

pub const DEFAULT_LEADERBOARD_LIMIT: i64 = 10;
pub const MAX_LEADERBOARD_LIMIT: i64 = 50;

/// Banner shown on the weekly board
pub const WEEKLY_TOP_REWARD: &str = "Les 3 premiers gagnent 50 points bonus!";

/// Read-only leaderboard query
#[derive(Clone)]
pub struct LeaderboardQuery {
    store: Arc<dyn PointsStore>,
}

impl LeaderboardQuery {
    pub fn new(store: Arc<dyn PointsStore>) -> Self {
        Self { store }
    }

    /// Top of the board for `window`, plus the requesting user's position
    ///
    /// `limit` is clamped to `1..=50`. Within the page, rank is the 1-based
    /// position, ties broken by ledger age. A requester outside the page is
    /// ranked one below the number of ledgers with strictly more points; a
    /// requester with no ledger yet gets no rank.
    pub async fn get_leaderboard(
        &self,
        window: Window,
        limit: i64,
        requesting_user: Option<UserId>,
    ) -> GamificationResult<Leaderboard> {
        let limit = limit.clamp(1, MAX_LEADERBOARD_LIMIT);
        let top = self.store.top_ledgers(window, limit).await?;

        let entries: Vec<LeaderboardEntry> = top
            .iter()
            .zip(1..)
            .map(|(ledger, rank)| LeaderboardEntry {
                rank,
                user_id: ledger.user_id,
                points: ledger.points_in(window),
                level: ledger.level,
                level_name: ledger.level.display_name(),
                streak: ledger.streak,
            })
            .collect();

        let user_rank = match requesting_user {
            Some(user_id) => self.rank_of(window, user_id, &entries).await?,
            None => None,
        };

        Ok(Leaderboard {
            window,
            entries,
            user_rank,
            top_reward: (window == Window::Weekly).then_some(WEEKLY_TOP_REWARD),
        })
    }

    async fn rank_of(
        &self,
        window: Window,
        user_id: UserId,
        page: &[LeaderboardEntry],
    ) -> GamificationResult<Option<UserRank>> {
        if let Some(entry) = page.iter().find(|e| e.user_id == user_id) {
            return Ok(Some(UserRank {
                rank: entry.rank,
                points: entry.points,
                level: entry.level,
                level_name: entry.level_name,
                streak: entry.streak,
                in_top: true,
            }));
        }

        let Some(ledger) = self.store.find_ledger(user_id).await? else {
            return Ok(None);
        };
        let points = ledger.points_in(window);
        let above = self.store.count_above(window, points).await?;

        Ok(Some(UserRank {
            rank: above + 1,
            points,
            level: ledger.level,
            level_name: ledger.level.display_name(),
            streak: ledger.streak,
            in_top: false,
        }))
    }
}
