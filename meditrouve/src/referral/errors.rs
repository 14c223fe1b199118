//! Referral error types.

use crate::{
    db::TimeoutError,
    gamification::{GamificationError, UserId},
    premium::PremiumError,
};
use std::time::Duration;
use thiserror::Error;

/// Referral errors
#[derive(Debug, Error)]
pub enum ReferralError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database round-trip exceeded its deadline
    #[error("Database operation timed out after {0:?}")]
    Timeout(Duration),

    /// No code matches, even ignoring case
    #[error("Invalid referral code: {0}")]
    InvalidCode(String),

    /// Referrer and referee are the same user
    #[error("Self-referral is not allowed")]
    SelfReferral,

    /// The referee already has a referral edge
    #[error("User {0} has already been referred")]
    AlreadyReferred(UserId),

    /// Every candidate code collided with an existing one
    #[error("Could not generate a unique referral code")]
    CodeGenerationExhausted,

    /// Crediting referral points failed
    #[error("Points error: {0}")]
    Points(#[from] GamificationError),

    /// Granting referral premium failed
    #[error("Premium error: {0}")]
    Premium(#[from] PremiumError),
}

impl ReferralError {
    /// Get a client-safe error message that doesn't leak internal details
    pub fn client_message(&self) -> String {
        match self {
            ReferralError::Database(_)
            | ReferralError::Timeout(_)
            | ReferralError::Premium(_)
            | ReferralError::CodeGenerationExhausted => "Erreur serveur".to_string(),
            ReferralError::InvalidCode(_) => "Code invalide".to_string(),
            ReferralError::SelfReferral => "Auto-parrainage interdit".to_string(),
            ReferralError::AlreadyReferred(_) => "Deja parraine".to_string(),
            ReferralError::Points(e) => e.client_message(),
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            ReferralError::Timeout(_) | ReferralError::Premium(_) => true,
            ReferralError::Points(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<TimeoutError> for ReferralError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Timeout(duration) => ReferralError::Timeout(duration),
            TimeoutError::Database(e) => ReferralError::Database(e),
        }
    }
}

/// Result type for referral operations
pub type ReferralResult<T> = Result<T, ReferralError>;
