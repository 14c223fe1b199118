//! Scheduled maintenance jobs for the MediTrouve points ledger.
//!
//! Meant to be driven by cron or a platform scheduler: each invocation runs
//! one command against the database and exits.

mod config;
mod logging;

use std::{sync::Arc, time::Instant};

use anyhow::Error;
use meditrouve::{
    db::Database,
    gamification::{LeaderboardQuery, PgPointsStore, PointsEngine, Window},
    premium::PgPremiumGrantor,
    referral::{PgReferralStore, ReferralManager},
};
use pico_args::Arguments;

use config::JobsConfig;

const HELP: &str = "\
Run MediTrouve gamification maintenance jobs

USAGE:
  mt_jobs [OPTIONS] <COMMAND>

COMMANDS:
  migrate                  Apply pending schema migrations
  health                   Check database connectivity
  reset-weekly             Zero every weekly points counter (run Monday 00:00)
  reset-monthly            Zero every monthly points counter (run on the 1st at 00:00)
  leaderboard              Print a leaderboard
  referral-stats           Print a user's referral code and totals

OPTIONS:
  --db-url     URL         Database connection string  [default: env DATABASE_URL]
  --window     WINDOW      Leaderboard window: weekly, monthly, allTime  [default: weekly]
  --limit      N           Leaderboard rows  [default: env LEADERBOARD_LIMIT or 10]
  --user       ID          User id for referral-stats, or to show a rank on the leaderboard

FLAGS:
  -h, --help               Print help information

ENVIRONMENT:
  DATABASE_URL             PostgreSQL connection string
  RUST_LOG                 Log filter (default: info,sqlx=warn)
  POINTS_DAY_OFFSET_MINUTES, POINTS_MAX_RETRIES, REFERRAL_POLICY, REFERRAL_SALT
  (See .env file for all configuration options)
";

struct Args {
    command: String,
    database_url: Option<String>,
    window: Window,
    limit: Option<i64>,
    user: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        command: pargs
            .subcommand()?
            .ok_or_else(|| anyhow::anyhow!("Missing command, see --help"))?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        window: pargs.opt_value_from_str("--window")?.unwrap_or_default(),
        limit: pargs.opt_value_from_str("--limit")?,
        user: pargs.opt_value_from_str("--user")?,
    };

    logging::init();

    let config = JobsConfig::from_env(args.database_url.clone(), args.limit);
    config.validate()?;

    let started = Instant::now();
    let db = Database::new(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
    tracing::debug!("Database connected");

    let result = run(&args, &config, &db).await;
    db.close().await;

    let affected = result?;
    logging::log_job_event(
        &args.command,
        affected,
        started.elapsed().as_millis() as u64,
    );
    Ok(())
}

/// Run one command and return how many rows it touched
async fn run(args: &Args, config: &JobsConfig, db: &Database) -> Result<u64, Error> {
    let pool = Arc::new(db.pool().clone());
    let store = Arc::new(PgPointsStore::new(pool.clone()));
    let engine = PointsEngine::new(store.clone(), config.points);

    match args.command.as_str() {
        "migrate" => {
            let started = Instant::now();
            db.migrate().await?;
            logging::log_database_operation(
                "MIGRATE",
                "_sqlx_migrations",
                started.elapsed().as_millis() as u64,
            );
            Ok(0)
        }
        "health" => {
            db.health_check().await?;
            println!("ok");
            Ok(0)
        }
        "reset-weekly" => {
            let started = Instant::now();
            let touched = engine.reset_weekly_points().await?;
            logging::log_database_operation(
                "RESET weekly_points",
                "user_points",
                started.elapsed().as_millis() as u64,
            );
            Ok(touched)
        }
        "reset-monthly" => {
            let started = Instant::now();
            let touched = engine.reset_monthly_points().await?;
            logging::log_database_operation(
                "RESET monthly_points",
                "user_points",
                started.elapsed().as_millis() as u64,
            );
            Ok(touched)
        }
        "leaderboard" => {
            let leaderboard = LeaderboardQuery::new(store)
                .get_leaderboard(args.window, config.leaderboard_limit, args.user)
                .await?;

            println!("{:?} leaderboard", leaderboard.window);
            if let Some(banner) = leaderboard.top_reward {
                println!("{banner}");
            }
            for entry in &leaderboard.entries {
                println!(
                    "{:>3}. user {:<10} {:>8} pts  {} (streak {})",
                    entry.rank, entry.user_id, entry.points, entry.level_name, entry.streak
                );
            }
            if let Some(rank) = leaderboard.user_rank.filter(|r| !r.in_top) {
                println!("...");
                println!("{:>3}. you {:>13} pts", rank.rank, rank.points);
            }
            Ok(leaderboard.entries.len() as u64)
        }
        "referral-stats" => {
            let user_id = args
                .user
                .ok_or_else(|| anyhow::anyhow!("referral-stats needs --user ID"))?;
            let referrals = ReferralManager::new(
                Arc::new(PgReferralStore::new(pool.clone())),
                engine,
                Arc::new(PgPremiumGrantor::new(pool)),
                config.referral.clone(),
            );

            let stats = referrals.referral_stats(user_id).await?;
            println!("code: {}", stats.referral_code);
            println!("referrals: {}", stats.total_referrals);
            println!("points earned: {}", stats.points_earned);
            for milestone in &stats.milestones {
                let mark = if milestone.achieved { "x" } else { " " };
                println!(
                    "  [{mark}] {} referrals: {}",
                    milestone.referrals, milestone.reward
                );
            }
            Ok(0)
        }
        other => Err(anyhow::anyhow!("Unknown command: {other}, see --help")),
    }
}
