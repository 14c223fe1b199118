//! Query timeout helpers
//!
//! Every PostgreSQL round-trip made by the storage backends goes through one
//! of these wrappers so a stuck connection surfaces as an error instead of
//! hanging the request that triggered it.

use std::time::Duration;
use tokio::time::timeout;

/// Single-statement reads and writes
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Multi-statement transactions (reward redemption, referral recording)
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-table batch updates run by the scheduled jobs
pub const BATCH_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Error type for timeout operations
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
    /// Operation timed out
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for timeout operations
pub type TimeoutResult<T> = Result<T, TimeoutError>;

/// Run a database future, giving up after `duration`
///
/// ```no_run
/// use meditrouve::db::timeouts::{with_timeout, DEFAULT_QUERY_TIMEOUT};
/// # use sqlx::PgPool;
/// # async fn example(pool: &PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let row = with_timeout(
///     DEFAULT_QUERY_TIMEOUT,
///     sqlx::query("SELECT total_points FROM user_points WHERE user_id = $1")
///         .bind(1_i64)
///         .fetch_optional(pool),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> TimeoutResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(duration, future).await {
        Ok(result) => result.map_err(TimeoutError::Database),
        Err(_) => Err(TimeoutError::Timeout(duration)),
    }
}

/// [`with_timeout`] with [`DEFAULT_QUERY_TIMEOUT`]
pub async fn with_default_timeout<F, T>(future: F) -> TimeoutResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    with_timeout(DEFAULT_QUERY_TIMEOUT, future).await
}

/// Deadline for futures that already return a domain error
///
/// Used around whole transactions, whose bodies mix database errors with
/// business-rule failures.
pub async fn with_deadline<F, T, E>(duration: Duration, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    timeout(duration, future)
        .await
        .unwrap_or_else(|_| Err(TimeoutError::Timeout(duration).into()))
}
