//! PostgreSQL [`ReferralStore`].
#![allow(clippy::needless_raw_string_hashes)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;

use super::{
    errors::ReferralResult,
    models::{Referral, ReferralCode},
    store::ReferralStore,
};
use crate::{
    db::timeouts::{TimeoutError, TimeoutResult, with_default_timeout},
    gamification::UserId,
};

fn code_from_row(row: &PgRow) -> Result<ReferralCode, sqlx::Error> {
    Ok(ReferralCode {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        code: row.try_get("code")?,
        created_at: row.try_get("created_at")?,
    })
}

fn referral_from_row(row: &PgRow) -> Result<Referral, sqlx::Error> {
    Ok(Referral {
        id: row.try_get("id")?,
        code_id: row.try_get("code_id")?,
        referrer_id: row.try_get("referrer_id")?,
        referee_id: row.try_get("referee_id")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Maps a unique-constraint violation to `None`
fn unless_duplicate<T>(
    result: TimeoutResult<PgRow>,
    map: fn(&PgRow) -> Result<T, sqlx::Error>,
) -> ReferralResult<Option<T>> {
    match result {
        Ok(row) => Ok(Some(map(&row)?)),
        Err(TimeoutError::Database(sqlx::Error::Database(e))) if e.is_unique_violation() => {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Referral store backed by PostgreSQL
#[derive(Clone)]
pub struct PgReferralStore {
    pool: Arc<PgPool>,
}

impl PgReferralStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferralStore for PgReferralStore {
    async fn find_code_by_user(&self, user_id: UserId) -> ReferralResult<Option<ReferralCode>> {
        let row = with_default_timeout(
            sqlx::query(
                "SELECT id, user_id, code, created_at FROM referral_codes WHERE user_id = $1",
            )
            .bind(user_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;
        Ok(row.as_ref().map(code_from_row).transpose()?)
    }

    async fn find_code(&self, code: &str) -> ReferralResult<Option<ReferralCode>> {
        let row = with_default_timeout(
            sqlx::query(
                "SELECT id, user_id, code, created_at FROM referral_codes WHERE code = $1",
            )
            .bind(code)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;
        Ok(row.as_ref().map(code_from_row).transpose()?)
    }

    async fn insert_code(
        &self,
        user_id: UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> ReferralResult<Option<ReferralCode>> {
        let result = with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO referral_codes (user_id, code, created_at)
                VALUES ($1, $2, $3)
                RETURNING id, user_id, code, created_at
                "#,
            )
            .bind(user_id)
            .bind(code)
            .bind(now)
            .fetch_one(self.pool.as_ref()),
        )
        .await;
        unless_duplicate(result, code_from_row)
    }

    async fn find_referral_by_referee(
        &self,
        referee_id: UserId,
    ) -> ReferralResult<Option<Referral>> {
        let row = with_default_timeout(
            sqlx::query(
                r#"
                SELECT id, code_id, referrer_id, referee_id, created_at
                FROM referrals
                WHERE referee_id = $1
                "#,
            )
            .bind(referee_id)
            .fetch_optional(self.pool.as_ref()),
        )
        .await?;
        Ok(row.as_ref().map(referral_from_row).transpose()?)
    }

    async fn insert_referral(
        &self,
        code: &ReferralCode,
        referee_id: UserId,
        now: DateTime<Utc>,
    ) -> ReferralResult<Option<Referral>> {
        let result = with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO referrals (code_id, referrer_id, referee_id, created_at)
                VALUES ($1, $2, $3, $4)
                RETURNING id, code_id, referrer_id, referee_id, created_at
                "#,
            )
            .bind(code.id)
            .bind(code.user_id)
            .bind(referee_id)
            .bind(now)
            .fetch_one(self.pool.as_ref()),
        )
        .await;
        unless_duplicate(result, referral_from_row)
    }

    async fn delete_referral(&self, referral_id: i64) -> ReferralResult<bool> {
        let result = with_default_timeout(
            sqlx::query("DELETE FROM referrals WHERE id = $1")
                .bind(referral_id)
                .execute(self.pool.as_ref()),
        )
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_referrals(&self, referrer_id: UserId) -> ReferralResult<i64> {
        let count = with_default_timeout(
            sqlx::query_scalar("SELECT COUNT(*) FROM referrals WHERE referrer_id = $1")
                .bind(referrer_id)
                .fetch_one(self.pool.as_ref()),
        )
        .await?;
        Ok(count)
    }
}
