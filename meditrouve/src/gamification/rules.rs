//! Point values and the pure award computations behind the accrual engine.

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};

use super::{
    errors::{GamificationError, GamificationResult},
    levels::Level,
    models::{
        BreakdownItem, EntryKind, LedgerUpdate, NewPointEntry, Reward, SignalType, UserPoints,
    },
};

pub const SIGNAL_AVAILABLE_POINTS: i64 = 10;
pub const SIGNAL_SHORTAGE_POINTS: i64 = 5;
pub const FIRST_OF_DAY_POINTS: i64 = 3;
pub const STREAK_7_DAYS_POINTS: i64 = 20;
pub const STREAK_30_DAYS_POINTS: i64 = 100;
pub const VERIFY_REPORT_POINTS: i64 = 2;
pub const SIGNAL_VERIFIED_POINTS: i64 = 5;

pub const SIGNAL_LABEL: &str = "Signalement";
pub const FIRST_OF_DAY_LABEL: &str = "Premier du jour";
pub const STREAK_7_DAYS_LABEL: &str = "Streak 7 jours!";
pub const STREAK_30_DAYS_LABEL: &str = "Streak 30 jours!";

/// Start of the calendar day containing `now`, in the zone at `offset`
pub fn day_start(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_midnight = now
        .with_timezone(&offset)
        .date_naive()
        .and_time(NaiveTime::MIN);
    (local_midnight - TimeDelta::seconds(offset.local_minus_utc().into())).and_utc()
}

/// Points and streak produced by one signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalAward {
    pub points: i64,
    pub breakdown: Vec<BreakdownItem>,
    pub streak: i32,
}

/// Compute the award for a signal submitted at `now` against the prior ledger state
pub fn signal_award(
    signal: SignalType,
    prior_streak: i32,
    last_signal_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> SignalAward {
    let mut breakdown = Vec::with_capacity(3);

    let base = match signal {
        SignalType::Available => SIGNAL_AVAILABLE_POINTS,
        SignalType::Unavailable | SignalType::Limited => SIGNAL_SHORTAGE_POINTS,
    };
    breakdown.push(BreakdownItem {
        reason: SIGNAL_LABEL,
        points: base,
    });

    let today = day_start(now, offset);
    if last_signal_at.is_none_or(|last| last < today) {
        breakdown.push(BreakdownItem {
            reason: FIRST_OF_DAY_LABEL,
            points: FIRST_OF_DAY_POINTS,
        });
    }

    let yesterday = today - TimeDelta::days(1);
    let streak = if last_signal_at.is_some_and(|last| last >= yesterday) {
        prior_streak.saturating_add(1)
    } else {
        1
    };

    match streak {
        7 => breakdown.push(BreakdownItem {
            reason: STREAK_7_DAYS_LABEL,
            points: STREAK_7_DAYS_POINTS,
        }),
        30 => breakdown.push(BreakdownItem {
            reason: STREAK_30_DAYS_LABEL,
            points: STREAK_30_DAYS_POINTS,
        }),
        _ => {}
    }

    SignalAward {
        points: breakdown.iter().map(|item| item.points).sum(),
        breakdown,
        streak,
    }
}

/// Add `amount` to all three counters and recompute the level
pub fn credit(ledger: &UserPoints, amount: i64) -> GamificationResult<LedgerUpdate> {
    if amount < 0 {
        return Err(GamificationError::InvalidAmount(amount));
    }
    let bump = |value: i64| {
        value
            .checked_add(amount)
            .ok_or(GamificationError::InvalidAmount(amount))
    };

    let mut update = ledger.to_update();
    update.total_points = bump(ledger.total_points)?;
    update.weekly_points = bump(ledger.weekly_points)?;
    update.monthly_points = bump(ledger.monthly_points)?;
    update.level = Level::for_points(update.total_points);
    Ok(update)
}

/// Expiry of a premium grant of `days`, stacked after any premium time still running
pub fn premium_expiry(
    now: DateTime<Utc>,
    latest_active_expiry: Option<DateTime<Utc>>,
    days: i32,
) -> DateTime<Utc> {
    let start = latest_active_expiry.map_or(now, |expiry| expiry.max(now));
    start + TimeDelta::days(days.into())
}

/// Ledger changes and claim expiry for one redemption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub update: LedgerUpdate,
    pub expires_at: Option<DateTime<Utc>>,
    pub entry: NewPointEntry,
}

/// Validate and price a redemption against the locked ledger
///
/// Weekly and monthly counters are left alone: they track points earned.
pub fn plan_redemption(
    ledger: &UserPoints,
    reward: &Reward,
    holds_badge: bool,
    latest_active_premium: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> GamificationResult<Redemption> {
    if ledger.total_points < reward.points_cost {
        return Err(GamificationError::InsufficientPoints {
            current: ledger.total_points,
            required: reward.points_cost,
        });
    }
    if reward.reward_type.is_badge() && holds_badge {
        return Err(GamificationError::AlreadyClaimed(reward.id));
    }

    let mut update = ledger.to_update();
    update.total_points = ledger.total_points - reward.points_cost;
    update.level = Level::for_points(update.total_points);

    Ok(Redemption {
        update,
        expires_at: reward
            .grants_premium()
            .map(|days| premium_expiry(now, latest_active_premium, days)),
        entry: NewPointEntry {
            amount: -reward.points_cost,
            kind: EntryKind::Redemption,
            reason: format!("Recompense: {}", reward.name),
        },
    })
}
