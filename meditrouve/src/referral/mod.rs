//! Referral codes and rewards.
//!
//! Every user gets one shareable code on first request. A new user who signs
//! up with someone's code is linked to them exactly once, and both are
//! rewarded according to the configured [`ReferralPolicy`].

pub mod config;
pub mod errors;
pub mod manager;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use config::ReferralConfig;
pub use errors::{ReferralError, ReferralResult};
pub use manager::ReferralManager;
pub use memory::MemoryReferralStore;
pub use models::{
    AppliedReferral, Referral, ReferralCode, ReferralMilestone, ReferralPolicy, ReferralReward,
    ReferralStats,
};
pub use postgres::PgReferralStore;
pub use store::ReferralStore;
