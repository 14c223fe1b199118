//! Points, levels, leaderboards and rewards for community contributors.
//!
//! This module implements:
//! - Per-user points ledger with weekly, monthly and lifetime counters
//! - Signal and verification awards with daily bonus and streak milestones
//! - Optimistic compare-and-swap updates so concurrent awards never get lost
//! - Weekly, monthly and all-time leaderboards
//! - Reward catalog with atomic redemption and stacking premium grants
//!
//! ## Example
//!
//! ```no_run
//! use meditrouve::db::Database;
//! use meditrouve::gamification::{PgPointsStore, PointsConfig, PointsEngine, SignalType};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(&Default::default()).await?;
//!     let store = Arc::new(PgPointsStore::new(Arc::new(db.pool().clone())));
//!     let engine = PointsEngine::new(store, PointsConfig::from_env());
//!
//!     let outcome = engine.record_signal(42, SignalType::Available).await?;
//!     println!("+{} points, streak {}", outcome.points_awarded, outcome.streak);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod errors;
pub mod leaderboard;
pub mod levels;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod rewards;
pub mod rules;
pub mod store;

pub use config::PointsConfig;
pub use engine::PointsEngine;
pub use errors::{GamificationError, GamificationResult};
pub use leaderboard::LeaderboardQuery;
pub use levels::{LEVELS, Level, LevelProgress, NextLevel};
pub use memory::MemoryPointsStore;
pub use models::{
    ActiveReward, AddPointsOutcome, BreakdownItem, ClaimedReward, EntryKind, Leaderboard,
    LeaderboardEntry, NewPointEntry, NewReward, PointCredit, PointEntry, PointsSummary, Reward,
    RewardId, RewardList, RewardListing, RewardType, SignalOutcome, SignalType, UnknownVariant,
    UserId, UserPoints, UserRank, UserReward, Window,
};
pub use postgres::PgPointsStore;
pub use rewards::RewardManager;
pub use store::PointsStore;
