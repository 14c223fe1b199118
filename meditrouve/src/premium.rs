//! Premium entitlement collaborator.
//!
//! Reward redemptions and the premium referral policy end with a one-way
//! "premium until X" call into billing. Billing owns what that means for the
//! account; this crate only records the grant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    db::timeouts::{TimeoutError, with_default_timeout},
    gamification::UserId,
};

/// What triggered a premium grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PremiumSource {
    Reward,
    Referral,
}

impl PremiumSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PremiumSource::Reward => "REWARD",
            PremiumSource::Referral => "REFERRAL",
        }
    }
}

impl fmt::Display for PremiumSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Premium grant failures
#[derive(Debug, Error)]
pub enum PremiumError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<TimeoutError> for PremiumError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Timeout(duration) => PremiumError::Timeout(duration),
            TimeoutError::Database(e) => PremiumError::Database(e),
        }
    }
}

pub type PremiumResult<T> = Result<T, PremiumError>;

/// Account/billing side of premium grants
#[async_trait]
pub trait PremiumGrantor: Send + Sync {
    /// Make `user_id` premium until at least `until`
    async fn grant_premium_until(
        &self,
        user_id: UserId,
        until: DateTime<Utc>,
        source: PremiumSource,
    ) -> PremiumResult<()>;
}

/// Writes grants to the `premium_entitlements` table read by billing
#[derive(Clone)]
pub struct PgPremiumGrantor {
    pool: Arc<PgPool>,
}

impl PgPremiumGrantor {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Current entitlement end, if any
    pub async fn premium_until(&self, user_id: UserId) -> PremiumResult<Option<DateTime<Utc>>> {
        let until = with_default_timeout(
            sqlx::query_scalar("SELECT premium_until FROM premium_entitlements WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(self.pool.as_ref()),
        )
        .await?;
        Ok(until)
    }
}

#[async_trait]
impl PremiumGrantor for PgPremiumGrantor {
    async fn grant_premium_until(
        &self,
        user_id: UserId,
        until: DateTime<Utc>,
        source: PremiumSource,
    ) -> PremiumResult<()> {
        with_default_timeout(
            sqlx::query(
                r#"
                INSERT INTO premium_entitlements (user_id, premium_until, source, updated_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (user_id) DO UPDATE
                SET premium_until = GREATEST(premium_entitlements.premium_until, EXCLUDED.premium_until),
                    source = EXCLUDED.source,
                    updated_at = NOW()
                "#,
            )
            .bind(user_id)
            .bind(until)
            .bind(source.as_str())
            .execute(self.pool.as_ref()),
        )
        .await?;

        log::info!(
            "Premium granted to user {} until {} ({})",
            user_id,
            until,
            source
        );
        Ok(())
    }
}

/// One recorded call to [`MemoryPremiumGrantor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PremiumGrant {
    pub user_id: UserId,
    pub until: DateTime<Utc>,
    pub source: PremiumSource,
}

/// Records grants in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryPremiumGrantor {
    grants: Arc<RwLock<Vec<PremiumGrant>>>,
}

impl MemoryPremiumGrantor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every grant so far, in call order
    pub async fn grants(&self) -> Vec<PremiumGrant> {
        self.grants.read().await.clone()
    }

    /// Latest entitlement end for a user
    pub async fn premium_until(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        self.grants
            .read()
            .await
            .iter()
            .filter(|g| g.user_id == user_id)
            .map(|g| g.until)
            .max()
    }
}

#[async_trait]
impl PremiumGrantor for MemoryPremiumGrantor {
    async fn grant_premium_until(
        &self,
        user_id: UserId,
        until: DateTime<Utc>,
        source: PremiumSource,
    ) -> PremiumResult<()> {
        self.grants.write().await.push(PremiumGrant {
            user_id,
            until,
            source,
        });
        Ok(())
    }
}
