//! # MediTrouve
//!
//! Gamification core for a community medication-availability service:
//! contributors earn points for pharmacy stock signals and verifications,
//! climb a level table, compete on weekly and monthly leaderboards, spend
//! points on badges and premium time, and invite others through referral
//! codes.
//!
//! ## Core Modules
//!
//! - [`gamification`]: points ledger, accrual rules, leaderboard, reward redemption
//! - [`referral`]: referral codes, one-time referral edges and their rewards
//! - [`premium`]: the billing-side premium grant seam
//! - [`plans`]: subscription plan capability table
//! - [`db`]: PostgreSQL pool, configuration, migrations and query timeouts
//!
//! Each storage-backed component has a PostgreSQL implementation and an
//! in-memory one with the same atomicity guarantees.
//!
//! ## Example
//!
//! ```
//! use meditrouve::gamification::{MemoryPointsStore, PointsConfig, PointsEngine, SignalType};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let engine = PointsEngine::new(Arc::new(MemoryPointsStore::new()), PointsConfig::utc());
//! let outcome = engine.record_signal(1, SignalType::Available).await.unwrap();
//! assert_eq!(outcome.points_awarded, 13);
//! # }
//! ```

/// Database pool, configuration and timeouts.
pub mod db;

/// Points, levels, leaderboards and rewards.
pub mod gamification;
pub use gamification::{
    GamificationError, GamificationResult, LeaderboardQuery, Level, PointsEngine, RewardManager,
    UserId, Window,
};

pub mod plans;
pub mod premium;

/// Referral codes and rewards.
pub mod referral;
pub use referral::{ReferralError, ReferralManager, ReferralResult};
