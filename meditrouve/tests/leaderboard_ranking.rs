//! Leaderboard ranking over ledgers built through the accrual engine.

use meditrouve::gamification::{
    LeaderboardQuery, MemoryPointsStore, PointsConfig, PointsEngine, PointsStore, Window,
};
use std::sync::Arc;

/// Users 1..=n get the given points, credited in user order
async fn board(points: &[i64]) -> (LeaderboardQuery, PointsEngine) {
    let store: Arc<dyn PointsStore> = Arc::new(MemoryPointsStore::new());
    let engine = PointsEngine::new(store.clone(), PointsConfig::utc());
    for (user_id, amount) in (1..).zip(points) {
        engine.add_points(user_id, *amount, "seed").await.unwrap();
    }
    (LeaderboardQuery::new(store), engine)
}

#[tokio::test]
async fn test_weekly_ranks_with_ties() {
    let (query, _) = board(&[50, 30, 30, 10]).await;
    let leaderboard = query
        .get_leaderboard(Window::Weekly, 10, None)
        .await
        .unwrap();

    let ranks: Vec<i64> = leaderboard.entries.iter().map(|e| e.rank).collect();
    let users: Vec<i64> = leaderboard.entries.iter().map(|e| e.user_id).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    assert_eq!(users, vec![1, 2, 3, 4]);
    assert_eq!(leaderboard.entries[0].level_name, "Contributeur");

    // same answer on every call
    let again = query
        .get_leaderboard(Window::Weekly, 10, None)
        .await
        .unwrap();
    assert_eq!(again.entries, leaderboard.entries);
}

#[tokio::test]
async fn test_out_of_page_user_rank() {
    let (query, _) = board(&[50, 30, 30, 10]).await;
    let leaderboard = query
        .get_leaderboard(Window::Weekly, 1, Some(3))
        .await
        .unwrap();

    assert_eq!(leaderboard.entries.len(), 1);
    assert_eq!(leaderboard.entries[0].user_id, 1);
    let rank = leaderboard.user_rank.unwrap();
    assert!(!rank.in_top);
    assert_eq!(rank.rank, 2);

    let last = query
        .get_leaderboard(Window::Weekly, 1, Some(4))
        .await
        .unwrap()
        .user_rank
        .unwrap();
    assert_eq!(last.rank, 4);
}

#[tokio::test]
async fn test_weekly_reset_reorders_weekly_but_not_all_time() {
    let (query, engine) = board(&[50, 30]).await;
    engine.reset_weekly_points().await.unwrap();
    engine.add_points(2, 5, "fresh week").await.unwrap();

    let weekly = query
        .get_leaderboard(Window::Weekly, 10, Some(1))
        .await
        .unwrap();
    assert_eq!(weekly.entries[0].user_id, 2);
    assert_eq!(weekly.entries[0].points, 5);
    assert_eq!(weekly.user_rank.unwrap().points, 0);

    let all_time = query
        .get_leaderboard(Window::AllTime, 10, None)
        .await
        .unwrap();
    assert_eq!(all_time.entries[0].user_id, 1);
    assert_eq!(all_time.entries[0].points, 50);
    assert!(all_time.top_reward.is_none());
}

#[tokio::test]
async fn test_unranked_requester_creates_nothing() {
    let (query, _) = board(&[50]).await;
    let leaderboard = query
        .get_leaderboard(Window::Monthly, 10, Some(42))
        .await
        .unwrap();
    assert!(leaderboard.user_rank.is_none());
    assert_eq!(leaderboard.entries.len(), 1);
}
