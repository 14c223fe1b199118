//! Accrual engine configuration.

use chrono::{FixedOffset, Local, Offset, Utc};

use crate::db::config::parse_env_or;

/// Tunables for the points engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsConfig {
    /// Zone whose midnight starts a new day for first-of-day and streak rules
    pub day_offset: FixedOffset,

    /// Compare-and-swap attempts before giving up with `Conflict`
    pub max_retries: u32,
}

impl PointsConfig {
    /// Create configuration from environment variables
    ///
    /// - `POINTS_DAY_OFFSET_MINUTES`: minutes east of UTC (default: the host's local offset)
    /// - `POINTS_MAX_RETRIES`: compare-and-swap attempts (default: 5)
    pub fn from_env() -> Self {
        let local = Local::now().offset().fix();
        let day_offset = std::env::var("POINTS_DAY_OFFSET_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .and_then(|minutes| minutes.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .unwrap_or(local);

        Self {
            day_offset,
            max_retries: parse_env_or("POINTS_MAX_RETRIES", 5u32).max(1),
        }
    }

    /// UTC day boundaries, used by tests and UTC deployments
    pub fn utc() -> Self {
        Self {
            day_offset: Utc.fix(),
            max_retries: 5,
        }
    }
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
