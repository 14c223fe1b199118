//! Points accrual engine.
//!
//! Every mutation reads the ledger, computes the new counters with the pure
//! rules in [`rules`](super::rules), and writes them back with a
//! compare-and-swap on the ledger version. A lost race re-reads and
//! recomputes, so concurrent signals never drop an increment.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{
    config::PointsConfig,
    errors::{GamificationError, GamificationResult},
    levels::{Level, LevelProgress},
    models::{
        ActiveReward, AddPointsOutcome, EntryKind, LedgerUpdate, NewPointEntry, PointCredit,
        PointEntry, PointsSummary, SignalOutcome, SignalType, UserId, UserPoints,
    },
    rules::{self, SIGNAL_LABEL, SIGNAL_VERIFIED_POINTS, VERIFY_REPORT_POINTS},
    store::PointsStore,
};

/// Most history rows returned by one call
pub const MAX_HISTORY_LIMIT: i64 = 100;

const VERIFICATION_REASON: &str = "Verification";
const VERIFIED_BONUS_REASON: &str = "Signalement verifie";

/// Result of a committed compare-and-swap
struct Committed<R> {
    before: UserPoints,
    after: UserPoints,
    extra: R,
}

/// Points accrual engine
#[derive(Clone)]
pub struct PointsEngine {
    store: Arc<dyn PointsStore>,
    config: PointsConfig,
}

impl PointsEngine {
    pub fn new(store: Arc<dyn PointsStore>, config: PointsConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn PointsStore> {
        &self.store
    }

    pub fn config(&self) -> &PointsConfig {
        &self.config
    }

    /// Read-modify-write loop shared by every mutation
    async fn commit<R, F>(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        plan: F,
    ) -> GamificationResult<Committed<R>>
    where
        F: Fn(&UserPoints) -> GamificationResult<(LedgerUpdate, NewPointEntry, R)> + Send + Sync,
        R: Send,
    {
        let mut ledger = self.store.get_or_create_ledger(user_id, now).await?;

        for attempt in 1..=self.config.max_retries {
            let (update, entry, extra) = plan(&ledger)?;
            if let Some(after) = self
                .store
                .compare_and_swap(user_id, ledger.version, &update, &entry, now)
                .await?
            {
                return Ok(Committed {
                    before: ledger,
                    after,
                    extra,
                });
            }

            log::debug!(
                "Ledger of user {} changed under us (attempt {}/{})",
                user_id,
                attempt,
                self.config.max_retries
            );
            tokio::task::yield_now().await;
            ledger = self
                .store
                .find_ledger(user_id)
                .await?
                .ok_or(GamificationError::LedgerNotFound(user_id))?;
        }

        log::warn!(
            "Giving up on ledger update for user {} after {} attempts",
            user_id,
            self.config.max_retries
        );
        Err(GamificationError::Conflict {
            attempts: self.config.max_retries,
        })
    }

    /// Award points for a pharmacy availability signal
    pub async fn record_signal(
        &self,
        user_id: UserId,
        signal: SignalType,
    ) -> GamificationResult<SignalOutcome> {
        self.record_signal_at(user_id, signal, Utc::now()).await
    }

    pub async fn record_signal_at(
        &self,
        user_id: UserId,
        signal: SignalType,
        now: DateTime<Utc>,
    ) -> GamificationResult<SignalOutcome> {
        let offset = self.config.day_offset;
        let committed = self
            .commit(user_id, now, |ledger| {
                let award =
                    rules::signal_award(signal, ledger.streak, ledger.last_signal_at, now, offset);
                let mut update = rules::credit(ledger, award.points)?;
                update.streak = award.streak;
                update.last_signal_at = Some(now);
                update.reports_count += 1;
                let entry = NewPointEntry {
                    amount: award.points,
                    kind: EntryKind::Signal,
                    reason: SIGNAL_LABEL.to_string(),
                };
                Ok((update, entry, award))
            })
            .await?;

        let Committed {
            before,
            after,
            extra: award,
        } = committed;
        let level_up = after.level > before.level;
        if level_up {
            log::info!("User {} reached level {}", user_id, after.level);
        }

        Ok(SignalOutcome {
            points_awarded: award.points,
            breakdown: award.breakdown,
            total_points: after.total_points,
            streak: after.streak,
            level: after.level,
            level_up,
        })
    }

    /// Credit the verifier of someone else's report; returns the points awarded
    pub async fn record_verification(&self, user_id: UserId) -> GamificationResult<i64> {
        self.record_verification_at(user_id, Utc::now()).await
    }

    pub async fn record_verification_at(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> GamificationResult<i64> {
        self.credit_at(
            user_id,
            VERIFY_REPORT_POINTS,
            EntryKind::Verification,
            VERIFICATION_REASON,
            now,
        )
        .await?;
        Ok(VERIFY_REPORT_POINTS)
    }

    /// Credit a reporter whose report just got its first verification
    ///
    /// The caller guarantees this runs once per report.
    pub async fn record_verified_bonus(&self, reporter_id: UserId) -> GamificationResult<i64> {
        self.record_verified_bonus_at(reporter_id, Utc::now()).await
    }

    pub async fn record_verified_bonus_at(
        &self,
        reporter_id: UserId,
        now: DateTime<Utc>,
    ) -> GamificationResult<i64> {
        self.commit(reporter_id, now, |ledger| {
            let mut update = rules::credit(ledger, SIGNAL_VERIFIED_POINTS)?;
            update.verified_count += 1;
            let entry = NewPointEntry {
                amount: SIGNAL_VERIFIED_POINTS,
                kind: EntryKind::VerifiedBonus,
                reason: VERIFIED_BONUS_REASON.to_string(),
            };
            Ok((update, entry, ()))
        })
        .await?;
        Ok(SIGNAL_VERIFIED_POINTS)
    }

    /// Generic credit primitive
    pub async fn add_points(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
    ) -> GamificationResult<AddPointsOutcome> {
        self.add_points_at(user_id, amount, reason, Utc::now()).await
    }

    pub async fn add_points_at(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GamificationResult<AddPointsOutcome> {
        self.credit_at(user_id, amount, EntryKind::Adjustment, reason, now).await
    }

    /// [`add_points_at`](Self::add_points_at) with an explicit history kind
    pub async fn credit_at(
        &self,
        user_id: UserId,
        amount: i64,
        kind: EntryKind,
        reason: &str,
        now: DateTime<Utc>,
    ) -> GamificationResult<AddPointsOutcome> {
        let committed = self
            .commit(user_id, now, |ledger| {
                let update = rules::credit(ledger, amount)?;
                let entry = NewPointEntry {
                    amount,
                    kind,
                    reason: reason.to_string(),
                };
                Ok((update, entry, ()))
            })
            .await?;

        let level_up = committed.after.level > committed.before.level;
        if level_up {
            log::info!("User {} reached level {}", user_id, committed.after.level);
        }

        Ok(AddPointsOutcome {
            total_points: committed.after.total_points,
            level_up,
            new_level: level_up.then_some(committed.after.level),
        })
    }

    /// Credit several users as one unit; nobody is paid unless everybody is
    ///
    /// Outcomes come back in the order of `credits`.
    pub async fn credit_all_at(
        &self,
        credits: &[PointCredit],
        now: DateTime<Utc>,
    ) -> GamificationResult<Vec<AddPointsOutcome>> {
        if let Some(bad) = credits.iter().find(|c| c.entry.amount < 0) {
            return Err(GamificationError::InvalidAmount(bad.entry.amount));
        }

        let credited = self.store.credit_all(credits, now).await?;
        Ok(credits
            .iter()
            .zip(credited)
            .map(|(credit, ledger)| {
                let before = Level::for_points(ledger.total_points - credit.entry.amount);
                let level_up = ledger.level > before;
                if level_up {
                    log::info!("User {} reached level {}", credit.user_id, ledger.level);
                }
                AddPointsOutcome {
                    total_points: ledger.total_points,
                    level_up,
                    new_level: level_up.then_some(ledger.level),
                }
            })
            .collect())
    }

    /// "My points" view
    pub async fn summary(&self, user_id: UserId) -> GamificationResult<PointsSummary> {
        self.summary_at(user_id, Utc::now()).await
    }

    pub async fn summary_at(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> GamificationResult<PointsSummary> {
        let ledger = self.store.get_or_create_ledger(user_id, now).await?;
        let claimed = self.store.claimed_rewards(user_id).await?;
        let active_rewards = ActiveReward::active_at(claimed, now);

        let progress = LevelProgress::for_points(ledger.total_points);
        Ok(PointsSummary {
            total_points: ledger.total_points,
            weekly_points: ledger.weekly_points,
            monthly_points: ledger.monthly_points,
            level: ledger.level,
            level_name: ledger.level.display_name(),
            streak: ledger.streak,
            reports_count: ledger.reports_count,
            verified_count: ledger.verified_count,
            last_signal_at: ledger.last_signal_at,
            progress_to_next_level: progress.progress_to_next_level,
            points_to_next_level: progress.points_to_next_level,
            next_level: progress.next_level,
            active_rewards,
        })
    }

    /// Newest ledger movements first, at most [`MAX_HISTORY_LIMIT`]
    pub async fn history(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> GamificationResult<Vec<PointEntry>> {
        self.store
            .history(user_id, limit.clamp(1, MAX_HISTORY_LIMIT))
            .await
    }

    /// Zero every weekly counter; safe to run more than once
    pub async fn reset_weekly_points(&self) -> GamificationResult<u64> {
        let touched = self.store.reset_weekly(Utc::now()).await?;
        log::info!("Weekly points reset for {} ledgers", touched);
        Ok(touched)
    }

    /// Zero every monthly counter; safe to run more than once
    pub async fn reset_monthly_points(&self) -> GamificationResult<u64> {
        let touched = self.store.reset_monthly(Utc::now()).await?;
        log::info!("Monthly points reset for {} ledgers", touched);
        Ok(touched)
    }
}
