//! End-to-end accrual scenarios on the in-memory backend.
//!
//! Covers signal awards, first-of-day bonus, streak continuity and milestone
//! re-triggering, level-up reporting and the "my points" summary.

use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone, Utc};
use meditrouve::gamification::{
    EntryKind, Level, MemoryPointsStore, PointsConfig, PointsEngine, PointsStore, SignalType,
    UserPoints,
};
use std::sync::Arc;

fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

fn setup() -> (PointsEngine, MemoryPointsStore) {
    let store = MemoryPointsStore::new();
    let engine = PointsEngine::new(Arc::new(store.clone()), PointsConfig::utc());
    (engine, store)
}

#[tokio::test]
async fn test_fresh_user_available_signal() {
    let (engine, _) = setup();
    let outcome = engine
        .record_signal_at(1, SignalType::Available, at(2025, 5, 2, 10, 0))
        .await
        .unwrap();

    assert_eq!(outcome.points_awarded, 13);
    assert_eq!(outcome.total_points, 13);
    assert_eq!(outcome.streak, 1);
    assert_eq!(outcome.level, Level::Newbie);
}

#[tokio::test]
async fn test_streak_continuity_from_seeded_ledger() {
    let (engine, store) = setup();
    for (user_id, last) in [(1, at(2025, 5, 1, 23, 59)), (2, at(2025, 4, 30, 12, 0))] {
        store
            .insert_ledger(UserPoints {
                streak: 4,
                last_signal_at: Some(last),
                ..UserPoints::empty(0, user_id, last)
            })
            .await;
    }

    let now = at(2025, 5, 2, 8, 0);
    let continued = engine
        .record_signal_at(1, SignalType::Limited, now)
        .await
        .unwrap();
    assert_eq!(continued.streak, 5);

    let broken = engine
        .record_signal_at(2, SignalType::Limited, now)
        .await
        .unwrap();
    assert_eq!(broken.streak, 1);
}

#[tokio::test]
async fn test_first_of_day_bonus_once_per_day() {
    let (engine, _) = setup();
    let morning = engine
        .record_signal_at(1, SignalType::Unavailable, at(2025, 5, 2, 7, 0))
        .await
        .unwrap();
    let evening = engine
        .record_signal_at(1, SignalType::Unavailable, at(2025, 5, 2, 21, 0))
        .await
        .unwrap();

    assert_eq!(morning.points_awarded, 8);
    assert_eq!(evening.points_awarded, 5);
    assert_eq!(evening.breakdown.len(), 1);
}

#[tokio::test]
async fn test_day_boundary_follows_configured_offset() {
    let store = MemoryPointsStore::new();
    let paris = PointsConfig {
        day_offset: FixedOffset::east_opt(2 * 3600).unwrap(),
        ..PointsConfig::utc()
    };
    let engine = PointsEngine::new(Arc::new(store), paris);

    engine
        .record_signal_at(1, SignalType::Available, at(2025, 5, 2, 21, 0))
        .await
        .unwrap();
    // 22:30 UTC is already the next day at UTC+2
    let next = engine
        .record_signal_at(1, SignalType::Available, at(2025, 5, 2, 22, 30))
        .await
        .unwrap();
    assert_eq!(next.points_awarded, 13);
    assert_eq!(next.streak, 2);
}

#[tokio::test]
async fn test_milestone_retriggers_after_reset() {
    let (engine, _) = setup();
    let start = at(2025, 5, 1, 12, 0);

    let mut bonuses = Vec::new();
    // days 0..=7 consecutive, then a two-day gap, then seven more days
    let days = (0..8).chain(10..17);
    for day in days {
        let outcome = engine
            .record_signal_at(1, SignalType::Available, start + TimeDelta::days(day))
            .await
            .unwrap();
        if outcome.points_awarded > 13 {
            bonuses.push((day, outcome.streak));
        }
    }

    assert_eq!(bonuses, vec![(6, 7), (16, 7)]);
}

#[tokio::test]
async fn test_level_up_and_summary() {
    let (engine, _) = setup();
    engine.add_points(1, 190, "import").await.unwrap();

    let outcome = engine
        .record_signal_at(1, SignalType::Available, at(2025, 5, 2, 9, 0))
        .await
        .unwrap();
    assert!(outcome.level_up);
    assert_eq!(outcome.level, Level::SuperContributor);

    let summary = engine.summary(1).await.unwrap();
    assert_eq!(summary.total_points, 203);
    assert_eq!(summary.level_name, "Super Contributeur");
    assert_eq!(summary.reports_count, 1);
    assert_eq!(summary.points_to_next_level, 297);
    assert_eq!(summary.next_level.map(|n| n.level), Some(Level::Ambassador));
}

#[tokio::test]
async fn test_every_award_leaves_history() {
    let (engine, store) = setup();
    engine
        .record_signal_at(1, SignalType::Available, at(2025, 5, 2, 9, 0))
        .await
        .unwrap();
    engine.record_verification(1).await.unwrap();
    engine.record_verified_bonus(1).await.unwrap();
    engine.add_points(1, 0, "noop").await.unwrap();

    let history = engine.history(1, 50).await.unwrap();
    let kinds: Vec<EntryKind> = history.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EntryKind::Adjustment,
            EntryKind::VerifiedBonus,
            EntryKind::Verification,
            EntryKind::Signal,
        ]
    );

    let ledger = store.find_ledger(1).await.unwrap().unwrap();
    assert_eq!(history[0].total_after, ledger.total_points);
    assert_eq!(ledger.total_points, 20);
}
