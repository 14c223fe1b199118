//! Gamification data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

use super::levels::{Level, NextLevel};

/// User ID type, owned by the account collaborator
pub type UserId = i64;

/// Reward catalog ID type
pub type RewardId = i64;

/// A stored enum value that doesn't match any known variant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Availability status reported by a pharmacy signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Available,
    Unavailable,
    Limited,
}

impl FromStr for SignalType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SignalType::Available),
            "UNAVAILABLE" => Ok(SignalType::Unavailable),
            "LIMITED" => Ok(SignalType::Limited),
            other => Err(UnknownVariant::new("signal type", other)),
        }
    }
}

/// Per-user points ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPoints {
    /// Row id; gives the stable leaderboard tie-break order
    pub id: i64,
    pub user_id: UserId,
    pub total_points: i64,
    pub weekly_points: i64,
    pub monthly_points: i64,
    pub level: Level,
    pub streak: i32,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub reports_count: i64,
    pub verified_count: i64,
    /// Optimistic concurrency token, bumped on every write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserPoints {
    /// Fresh ledger as created on first access
    pub fn empty(id: i64, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            total_points: 0,
            weekly_points: 0,
            monthly_points: 0,
            level: Level::Newbie,
            streak: 0,
            last_signal_at: None,
            reports_count: 0,
            verified_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Counter ranked by `window`
    pub fn points_in(&self, window: Window) -> i64 {
        match window {
            Window::Weekly => self.weekly_points,
            Window::Monthly => self.monthly_points,
            Window::AllTime => self.total_points,
        }
    }

    /// Start an update from the current values
    pub fn to_update(&self) -> LedgerUpdate {
        LedgerUpdate {
            total_points: self.total_points,
            weekly_points: self.weekly_points,
            monthly_points: self.monthly_points,
            level: self.level,
            streak: self.streak,
            last_signal_at: self.last_signal_at,
            reports_count: self.reports_count,
            verified_count: self.verified_count,
        }
    }
}

/// New counter values written by a compare-and-swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerUpdate {
    pub total_points: i64,
    pub weekly_points: i64,
    pub monthly_points: i64,
    pub level: Level,
    pub streak: i32,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub reports_count: i64,
    pub verified_count: i64,
}

impl LedgerUpdate {
    /// Apply `ledger`'s current version and timestamps to these values
    pub fn applied_to(&self, ledger: &UserPoints, now: DateTime<Utc>) -> UserPoints {
        UserPoints {
            id: ledger.id,
            user_id: ledger.user_id,
            total_points: self.total_points,
            weekly_points: self.weekly_points,
            monthly_points: self.monthly_points,
            level: self.level,
            streak: self.streak,
            last_signal_at: self.last_signal_at,
            reports_count: self.reports_count,
            verified_count: self.verified_count,
            version: ledger.version + 1,
            created_at: ledger.created_at,
            updated_at: now,
        }
    }
}

/// What caused a ledger movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Signal,
    Verification,
    VerifiedBonus,
    Referral,
    Redemption,
    Adjustment,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Signal => "SIGNAL",
            EntryKind::Verification => "VERIFICATION",
            EntryKind::VerifiedBonus => "VERIFIED_BONUS",
            EntryKind::Referral => "REFERRAL",
            EntryKind::Redemption => "REDEMPTION",
            EntryKind::Adjustment => "ADJUSTMENT",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SIGNAL" => Ok(EntryKind::Signal),
            "VERIFICATION" => Ok(EntryKind::Verification),
            "VERIFIED_BONUS" => Ok(EntryKind::VerifiedBonus),
            "REFERRAL" => Ok(EntryKind::Referral),
            "REDEMPTION" => Ok(EntryKind::Redemption),
            "ADJUSTMENT" => Ok(EntryKind::Adjustment),
            other => Err(UnknownVariant::new("entry kind", other)),
        }
    }
}

/// History row to be written alongside a ledger update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPointEntry {
    pub amount: i64,
    pub kind: EntryKind,
    pub reason: String,
}

/// One credit inside a multi-user batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointCredit {
    pub user_id: UserId,
    pub entry: NewPointEntry,
}

/// Point history row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointEntry {
    pub id: i64,
    pub user_id: UserId,
    /// Signed; redemptions are negative
    pub amount: i64,
    pub total_after: i64,
    pub kind: EntryKind,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// One rule that contributed to a signal award
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakdownItem {
    pub reason: &'static str,
    pub points: i64,
}

/// Result of `record_signal`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalOutcome {
    pub points_awarded: i64,
    pub breakdown: Vec<BreakdownItem>,
    pub total_points: i64,
    pub streak: i32,
    pub level: Level,
    pub level_up: bool,
}

/// Result of `add_points`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddPointsOutcome {
    pub total_points: i64,
    pub level_up: bool,
    /// Set only when `level_up` is true
    pub new_level: Option<Level>,
}

/// Time scope of a leaderboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Window {
    #[default]
    Weekly,
    Monthly,
    AllTime,
}

impl Window {
    /// Ledger column ranked by this window
    pub fn column(self) -> &'static str {
        match self {
            Window::Weekly => "weekly_points",
            Window::Monthly => "monthly_points",
            Window::AllTime => "total_points",
        }
    }
}

impl FromStr for Window {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Window::Weekly),
            "monthly" => Ok(Window::Monthly),
            "allTime" => Ok(Window::AllTime),
            other => Err(UnknownVariant::new("leaderboard window", other)),
        }
    }
}

/// Leaderboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based position
    pub rank: i64,
    pub user_id: UserId,
    pub points: i64,
    pub level: Level,
    pub level_name: &'static str,
    pub streak: i32,
}

/// The requesting user's standing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRank {
    pub rank: i64,
    pub points: i64,
    pub level: Level,
    pub level_name: &'static str,
    pub streak: i32,
    pub in_top: bool,
}

/// A ranked page plus the requester's rank
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leaderboard {
    pub window: Window,
    pub entries: Vec<LeaderboardEntry>,
    /// `None` when anonymous or not yet ranked
    pub user_rank: Option<UserRank>,
    pub top_reward: Option<&'static str>,
}

/// Catalog reward kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardType {
    Badge,
    PremiumWeek,
    PremiumMonth,
    #[serde(rename = "PREMIUM_3MONTHS")]
    Premium3Months,
    PremiumYear,
}

impl RewardType {
    pub fn as_str(self) -> &'static str {
        match self {
            RewardType::Badge => "BADGE",
            RewardType::PremiumWeek => "PREMIUM_WEEK",
            RewardType::PremiumMonth => "PREMIUM_MONTH",
            RewardType::Premium3Months => "PREMIUM_3MONTHS",
            RewardType::PremiumYear => "PREMIUM_YEAR",
        }
    }

    /// Badges are claimable once per user
    pub fn is_badge(self) -> bool {
        self == RewardType::Badge
    }
}

impl fmt::Display for RewardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RewardType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BADGE" => Ok(RewardType::Badge),
            "PREMIUM_WEEK" => Ok(RewardType::PremiumWeek),
            "PREMIUM_MONTH" => Ok(RewardType::PremiumMonth),
            "PREMIUM_3MONTHS" => Ok(RewardType::Premium3Months),
            "PREMIUM_YEAR" => Ok(RewardType::PremiumYear),
            other => Err(UnknownVariant::new("reward type", other)),
        }
    }
}

/// Catalog entry (admin-managed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub id: RewardId,
    pub name: String,
    pub description: String,
    pub reward_type: RewardType,
    pub points_cost: i64,
    pub premium_days: Option<i32>,
    pub badge_icon: Option<String>,
    pub is_active: bool,
}

impl Reward {
    /// Premium days granted, if any
    pub fn grants_premium(&self) -> Option<i32> {
        self.premium_days.filter(|days| *days > 0)
    }
}

/// Catalog entry to insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReward {
    pub name: String,
    pub description: String,
    pub reward_type: RewardType,
    pub points_cost: i64,
    pub premium_days: Option<i32>,
    pub badge_icon: Option<String>,
}

/// Claim record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReward {
    pub id: i64,
    pub user_id: UserId,
    pub reward_id: RewardId,
    pub claimed_at: DateTime<Utc>,
    /// `None` for permanent badges
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserReward {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires| expires > now)
    }
}

/// A claim joined with its catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimedReward {
    pub claim: UserReward,
    pub reward: Reward,
}

/// Catalog entry annotated for one viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardListing {
    #[serde(flatten)]
    pub reward: Reward,
    pub can_claim: bool,
    pub already_claimed: bool,
}

/// Rewards view payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardList {
    pub rewards: Vec<RewardListing>,
    /// Zero for anonymous viewers
    pub user_points: i64,
}

/// Active reward line in the points summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveReward {
    pub claim_id: i64,
    pub reward_id: RewardId,
    pub name: String,
    pub reward_type: RewardType,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl ActiveReward {
    /// Active claims of `claimed` as of `now`, in claim order
    pub fn active_at(claimed: Vec<ClaimedReward>, now: DateTime<Utc>) -> Vec<Self> {
        claimed
            .into_iter()
            .filter(|c| c.claim.is_active_at(now))
            .map(|c| ActiveReward {
                claim_id: c.claim.id,
                reward_id: c.reward.id,
                name: c.reward.name,
                reward_type: c.reward.reward_type,
                claimed_at: c.claim.claimed_at,
                expires_at: c.claim.expires_at,
                is_active: true,
            })
            .collect()
    }
}

/// "My points" view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointsSummary {
    pub total_points: i64,
    pub weekly_points: i64,
    pub monthly_points: i64,
    pub level: Level,
    pub level_name: &'static str,
    pub streak: i32,
    pub reports_count: i64,
    pub verified_count: i64,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub progress_to_next_level: u8,
    pub points_to_next_level: i64,
    pub next_level: Option<NextLevel>,
    pub active_rewards: Vec<ActiveReward>,
}
