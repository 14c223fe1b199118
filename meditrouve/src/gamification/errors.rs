//! Gamification error types.

use super::models::{RewardId, UserId};
use crate::{db::TimeoutError, premium::PremiumError};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the points ledger, leaderboard and redemption engine
#[derive(Debug, Error)]
pub enum GamificationError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database round-trip exceeded its deadline
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    /// Points ledger missing for user
    #[error("Points ledger not found for user {0}")]
    LedgerNotFound(UserId),

    /// Reward missing or inactive
    #[error("Reward not found: {0}")]
    RewardNotFound(RewardId),

    /// Balance too low for the requested redemption
    #[error("Points insuffisants ({current}/{required})")]
    InsufficientPoints { current: i64, required: i64 },

    /// Badge already held by the user
    #[error("Badge deja obtenu: {0}")]
    AlreadyClaimed(RewardId),

    /// Negative amount, or one that would overflow the counters
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Concurrent updates kept winning the race against this one
    #[error("Concurrent update conflict after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// The claim is recorded and paid for, but billing did not take the grant
    ///
    /// [`RewardManager::resync_premium`](super::RewardManager::resync_premium)
    /// replays it.
    #[error("Claim {claim_id} recorded but premium grant failed: {source}")]
    PremiumPending {
        claim_id: i64,
        #[source]
        source: PremiumError,
    },

    /// Premium grant failed
    #[error("Premium grant failed: {0}")]
    Premium(#[from] PremiumError),
}

impl GamificationError {
    /// Get a client-safe error message that doesn't leak internal details
    pub fn client_message(&self) -> String {
        match self {
            GamificationError::Database(_)
            | GamificationError::Timeout(_)
            | GamificationError::Premium(_) => "Erreur serveur".to_string(),
            GamificationError::PremiumPending { .. } => {
                "Recompense obtenue, activation Premium en attente".to_string()
            }
            GamificationError::LedgerNotFound(_) => "Points introuvables".to_string(),
            GamificationError::RewardNotFound(_) => "Recompense non trouvee".to_string(),
            GamificationError::AlreadyClaimed(_) => "Badge deja obtenu".to_string(),
            GamificationError::Conflict { .. } => {
                "Mise a jour concurrente, veuillez reessayer".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Points still missing for an [`InsufficientPoints`](Self::InsufficientPoints) failure
    pub fn shortfall(&self) -> Option<i64> {
        match self {
            GamificationError::InsufficientPoints { current, required } => {
                Some(required - current)
            }
            _ => None,
        }
    }

    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GamificationError::Conflict { .. }
                | GamificationError::Timeout(_)
                | GamificationError::PremiumPending { .. }
                | GamificationError::Premium(_)
        )
    }
}

impl From<TimeoutError> for GamificationError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Timeout(duration) => GamificationError::Timeout(duration),
            TimeoutError::Database(e) => GamificationError::Database(e),
        }
    }
}

/// Result type for gamification operations
pub type GamificationResult<T> = Result<T, GamificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_points_reports_both_amounts() {
        let err = GamificationError::InsufficientPoints {
            current: 40,
            required: 60,
        };
        assert_eq!(err.client_message(), "Points insuffisants (40/60)");
        assert_eq!(err.shortfall(), Some(20));
    }

    #[test]
    fn test_database_errors_are_sanitized() {
        let err = GamificationError::Database(sqlx::Error::RowNotFound);
        assert_eq!(err.client_message(), "Erreur serveur");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_conflict_is_transient() {
        assert!(GamificationError::Conflict { attempts: 5 }.is_transient());
        assert!(!GamificationError::AlreadyClaimed(3).is_transient());
    }

    #[test]
    fn test_pending_premium_is_retryable() {
        let err = GamificationError::PremiumPending {
            claim_id: 7,
            source: PremiumError::Timeout(Duration::from_secs(5)),
        };
        assert!(err.is_transient());
        assert_eq!(
            err.client_message(),
            "Recompense obtenue, activation Premium en attente"
        );
        assert!(err.to_string().contains("Claim 7"));
    }

    #[test]
    fn test_timeout_conversion() {
        let err: GamificationError = TimeoutError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(err, GamificationError::Timeout(_)));
    }
}
