//! PostgreSQL [`PointsStore`].
#![allow(clippy::needless_raw_string_hashes)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use std::{collections::HashMap, str::FromStr, sync::Arc};

use super::{
    errors::{GamificationError, GamificationResult},
    models::{
        ClaimedReward, LedgerUpdate, NewPointEntry, NewReward, PointCredit, PointEntry, Reward,
        RewardId, UnknownVariant, UserId, UserPoints, UserReward, Window,
    },
    rules::{self, plan_redemption},
    store::PointsStore,
};
use crate::db::timeouts::{
    BATCH_OPERATION_TIMEOUT, DEFAULT_TRANSACTION_TIMEOUT, with_deadline, with_default_timeout,
    with_timeout,
};

const LEDGER_COLUMNS: &str = "id, user_id, total_points, weekly_points, monthly_points, level, \
     streak, last_signal_at, reports_count, verified_count, version, created_at, updated_at";

const REWARD_COLUMNS: &str =
    "id, name, description, reward_type, points_cost, premium_days, badge_icon, is_active";

fn decode<T>(value: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = UnknownVariant>,
{
    value.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn ledger_from_row(row: &PgRow) -> Result<UserPoints, sqlx::Error> {
    Ok(UserPoints {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        total_points: row.try_get("total_points")?,
        weekly_points: row.try_get("weekly_points")?,
        monthly_points: row.try_get("monthly_points")?,
        level: decode(row.try_get("level")?)?,
        streak: row.try_get("streak")?,
        last_signal_at: row.try_get("last_signal_at")?,
        reports_count: row.try_get("reports_count")?,
        verified_count: row.try_get("verified_count")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn reward_from_row(row: &PgRow) -> Result<Reward, sqlx::Error> {
    Ok(Reward {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        reward_type: decode(row.try_get("reward_type")?)?,
        points_cost: row.try_get("points_cost")?,
        premium_days: row.try_get("premium_days")?,
        badge_icon: row.try_get("badge_icon")?,
        is_active: row.try_get("is_active")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<PointEntry, sqlx::Error> {
    Ok(PointEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        total_after: row.try_get("total_after")?,
        kind: decode(row.try_get("kind")?)?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Points store backed by PostgreSQL
#[derive(Clone)]
pub struct PgPointsStore {
    pool: Arc<PgPool>,
}

impl PgPointsStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Add a catalog entry
    pub async fn insert_reward(&self, reward: &NewReward) -> GamificationResult<Reward> {
        let sql = format!(
            "INSERT INTO rewards (name, description, reward_type, points_cost, premium_days, badge_icon) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {REWARD_COLUMNS}"
        );
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(&reward.name)
                .bind(&reward.description)
                .bind(reward.reward_type.as_str())
                .bind(reward.points_cost)
                .bind(reward.premium_days)
                .bind(&reward.badge_icon)
                .fetch_one(self.pool.as_ref()),
        )
        .await?;
        Ok(reward_from_row(&row)?)
    }

    /// Retire a catalog entry; existing claims stay
    pub async fn deactivate_reward(&self, reward_id: RewardId) -> GamificationResult<bool> {
        let result = with_default_timeout(
            sqlx::query("UPDATE rewards SET is_active = FALSE WHERE id = $1")
                .bind(reward_id)
                .execute(self.pool.as_ref()),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        entry: &NewPointEntry,
        total_after: i64,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO point_entries (user_id, amount, total_after, kind, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user_id)
        .bind(entry.amount)
        .bind(total_after)
        .bind(entry.kind.as_str())
        .bind(&entry.reason)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn reset_column(&self, column: &str, now: DateTime<Utc>) -> GamificationResult<u64> {
        let sql = format!(
            "UPDATE user_points SET {column} = 0, version = version + 1, updated_at = $1 \
             WHERE {column} <> 0"
        );
        let result = with_timeout(
            BATCH_OPERATION_TIMEOUT,
            sqlx::query(&sql).bind(now).execute(self.pool.as_ref()),
        )
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PointsStore for PgPointsStore {
    async fn find_ledger(&self, user_id: UserId) -> GamificationResult<Option<UserPoints>> {
        let sql = format!("SELECT {LEDGER_COLUMNS} FROM user_points WHERE user_id = $1");
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(user_id)
                .fetch_optional(self.pool.as_ref()),
        )
        .await?;
        Ok(row.as_ref().map(ledger_from_row).transpose()?)
    }

    async fn get_or_create_ledger(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> GamificationResult<UserPoints> {
        with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO user_points (user_id, created_at, updated_at)
                VALUES ($1, $2, $2)
                ON CONFLICT (user_id) DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(now)
            .execute(self.pool.as_ref()),
        )
        .await?;

        self.find_ledger(user_id)
            .await?
            .ok_or(GamificationError::LedgerNotFound(user_id))
    }

    async fn compare_and_swap(
        &self,
        user_id: UserId,
        expected_version: i64,
        update: &LedgerUpdate,
        entry: &NewPointEntry,
        now: DateTime<Utc>,
    ) -> GamificationResult<Option<UserPoints>> {
        let sql = format!(
            "UPDATE user_points SET total_points = $3, weekly_points = $4, monthly_points = $5, \
             level = $6, streak = $7, last_signal_at = $8, reports_count = $9, \
             verified_count = $10, version = version + 1, updated_at = $11 \
             WHERE user_id = $1 AND version = $2 RETURNING {LEDGER_COLUMNS}"
        );

        with_deadline(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;

            let Some(row) = sqlx::query(&sql)
                .bind(user_id)
                .bind(expected_version)
                .bind(update.total_points)
                .bind(update.weekly_points)
                .bind(update.monthly_points)
                .bind(update.level.as_str())
                .bind(update.streak)
                .bind(update.last_signal_at)
                .bind(update.reports_count)
                .bind(update.verified_count)
                .bind(now)
                .fetch_optional(&mut *tx)
                .await?
            else {
                tx.rollback().await?;
                return Ok(None);
            };

            let updated = ledger_from_row(&row)?;
            Self::insert_entry(&mut tx, user_id, entry, updated.total_points, now).await?;
            tx.commit().await?;
            Ok::<_, GamificationError>(Some(updated))
        })
        .await
    }

    async fn credit_all(
        &self,
        credits: &[PointCredit],
        now: DateTime<Utc>,
    ) -> GamificationResult<Vec<UserPoints>> {
        let mut user_ids: Vec<UserId> = credits.iter().map(|c| c.user_id).collect();
        user_ids.sort_unstable();
        user_ids.dedup();

        // rows are locked in user id order so concurrent batches can't deadlock
        let lock_sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM user_points WHERE user_id = ANY($1) \
             ORDER BY user_id FOR UPDATE"
        );
        let update_sql = format!(
            "UPDATE user_points SET total_points = $2, weekly_points = $3, monthly_points = $4, \
             level = $5, version = version + 1, updated_at = $6 \
             WHERE user_id = $1 RETURNING {LEDGER_COLUMNS}"
        );

        with_deadline(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO user_points (user_id, created_at, updated_at)
                SELECT user_id, $2, $2 FROM UNNEST($1::BIGINT[]) AS t(user_id)
                ON CONFLICT (user_id) DO NOTHING
                "#,
            )
            .bind(user_ids.as_slice())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let mut ledgers = HashMap::with_capacity(user_ids.len());
            for row in sqlx::query(&lock_sql)
                .bind(user_ids.as_slice())
                .fetch_all(&mut *tx)
                .await?
            {
                let ledger = ledger_from_row(&row)?;
                ledgers.insert(ledger.user_id, ledger);
            }

            let mut credited = Vec::with_capacity(credits.len());
            for credit in credits {
                let ledger = ledgers
                    .get(&credit.user_id)
                    .ok_or(GamificationError::LedgerNotFound(credit.user_id))?;
                let update = rules::credit(ledger, credit.entry.amount)?;

                let row = sqlx::query(&update_sql)
                    .bind(credit.user_id)
                    .bind(update.total_points)
                    .bind(update.weekly_points)
                    .bind(update.monthly_points)
                    .bind(update.level.as_str())
                    .bind(now)
                    .fetch_one(&mut *tx)
                    .await?;
                let updated = ledger_from_row(&row)?;
                Self::insert_entry(
                    &mut tx,
                    credit.user_id,
                    &credit.entry,
                    updated.total_points,
                    now,
                )
                .await?;

                ledgers.insert(credit.user_id, updated.clone());
                credited.push(updated);
            }

            tx.commit().await?;
            Ok::<_, GamificationError>(credited)
        })
        .await
    }

    async fn history(&self, user_id: UserId, limit: i64) -> GamificationResult<Vec<PointEntry>> {
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                SELECT id, user_id, amount, total_after, kind, reason, created_at
                FROM point_entries
                WHERE user_id = $1
                ORDER BY id DESC
                LIMIT $2
                "#,
            )
            .bind(user_id)
            .bind(limit.max(0))
            .fetch_all(self.pool.as_ref()),
        )
        .await?;

        Ok(rows
            .iter()
            .map(entry_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn reset_weekly(&self, now: DateTime<Utc>) -> GamificationResult<u64> {
        self.reset_column(Window::Weekly.column(), now).await
    }

    async fn reset_monthly(&self, now: DateTime<Utc>) -> GamificationResult<u64> {
        self.reset_column(Window::Monthly.column(), now).await
    }

    async fn top_ledgers(
        &self,
        window: Window,
        limit: i64,
    ) -> GamificationResult<Vec<UserPoints>> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM user_points ORDER BY {} DESC, id ASC LIMIT $1",
            window.column()
        );
        let rows = with_default_timeout(
            sqlx::query(&sql)
                .bind(limit.max(0))
                .fetch_all(self.pool.as_ref()),
        )
        .await?;

        Ok(rows
            .iter()
            .map(ledger_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn count_above(&self, window: Window, points: i64) -> GamificationResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) AS above FROM user_points WHERE {} > $1",
            window.column()
        );
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(points)
                .fetch_one(self.pool.as_ref()),
        )
        .await?;
        Ok(row.try_get("above")?)
    }

    async fn active_rewards(&self) -> GamificationResult<Vec<Reward>> {
        let sql = format!(
            "SELECT {REWARD_COLUMNS} FROM rewards WHERE is_active ORDER BY points_cost ASC, id ASC"
        );
        let rows =
            with_default_timeout(sqlx::query(&sql).fetch_all(self.pool.as_ref())).await?;

        Ok(rows
            .iter()
            .map(reward_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn find_active_reward(&self, reward_id: RewardId) -> GamificationResult<Option<Reward>> {
        let sql = format!("SELECT {REWARD_COLUMNS} FROM rewards WHERE id = $1 AND is_active");
        let row = with_default_timeout(
            sqlx::query(&sql)
                .bind(reward_id)
                .fetch_optional(self.pool.as_ref()),
        )
        .await?;
        Ok(row.as_ref().map(reward_from_row).transpose()?)
    }

    async fn claimed_rewards(&self, user_id: UserId) -> GamificationResult<Vec<ClaimedReward>> {
        let rows = with_default_timeout(
            sqlx::query(
                r#"
                SELECT ur.id AS claim_id, ur.user_id, ur.claimed_at, ur.expires_at,
                       r.id, r.name, r.description, r.reward_type, r.points_cost,
                       r.premium_days, r.badge_icon, r.is_active
                FROM user_rewards ur
                JOIN rewards r ON r.id = ur.reward_id
                WHERE ur.user_id = $1
                ORDER BY ur.id ASC
                "#,
            )
            .bind(user_id)
            .fetch_all(self.pool.as_ref()),
        )
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let reward = reward_from_row(row)?;
            claimed.push(ClaimedReward {
                claim: UserReward {
                    id: row.try_get("claim_id")?,
                    user_id: row.try_get("user_id")?,
                    reward_id: reward.id,
                    claimed_at: row.try_get("claimed_at")?,
                    expires_at: row.try_get("expires_at")?,
                },
                reward,
            });
        }
        Ok(claimed)
    }

    async fn redeem(
        &self,
        user_id: UserId,
        reward: &Reward,
        now: DateTime<Utc>,
    ) -> GamificationResult<UserReward> {
        let lock_sql =
            format!("SELECT {LEDGER_COLUMNS} FROM user_points WHERE user_id = $1 FOR UPDATE");

        with_deadline(DEFAULT_TRANSACTION_TIMEOUT, async {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(&lock_sql)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(GamificationError::LedgerNotFound(user_id))?;
            let ledger = ledger_from_row(&row)?;

            let holds_badge: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM user_rewards WHERE user_id = $1 AND reward_id = $2
                )
                "#,
            )
            .bind(user_id)
            .bind(reward.id)
            .fetch_one(&mut *tx)
            .await?;

            let latest_active_premium: Option<DateTime<Utc>> = sqlx::query_scalar(
                r#"
                SELECT MAX(expires_at)
                FROM user_rewards
                WHERE user_id = $1 AND expires_at > $2
                "#,
            )
            .bind(user_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            let plan = plan_redemption(&ledger, reward, holds_badge, latest_active_premium, now)?;

            sqlx::query(
                r#"
                UPDATE user_points
                SET total_points = $2, level = $3, version = version + 1, updated_at = $4
                WHERE user_id = $1
                "#,
            )
            .bind(user_id)
            .bind(plan.update.total_points)
            .bind(plan.update.level.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let claim_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO user_rewards (user_id, reward_id, claimed_at, expires_at)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(user_id)
            .bind(reward.id)
            .bind(now)
            .bind(plan.expires_at)
            .fetch_one(&mut *tx)
            .await?;

            Self::insert_entry(&mut tx, user_id, &plan.entry, plan.update.total_points, now)
                .await?;

            tx.commit().await?;

            Ok::<_, GamificationError>(UserReward {
                id: claim_id,
                user_id,
                reward_id: reward.id,
                claimed_at: now,
                expires_at: plan.expires_at,
            })
        })
        .await
    }
}
