//! Level table: cumulative points to named tier.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::models::UnknownVariant;

/// Contributor tier, ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Newbie,
    Contributor,
    SuperContributor,
    Ambassador,
    Legend,
}

/// One row of the level table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    pub level: Level,
    pub min_points: i64,
    pub name: &'static str,
}

/// All levels, ascending by threshold
pub static LEVELS: [LevelInfo; 5] = [
    LevelInfo {
        level: Level::Newbie,
        min_points: 0,
        name: "Debutant",
    },
    LevelInfo {
        level: Level::Contributor,
        min_points: 50,
        name: "Contributeur",
    },
    LevelInfo {
        level: Level::SuperContributor,
        min_points: 200,
        name: "Super Contributeur",
    },
    LevelInfo {
        level: Level::Ambassador,
        min_points: 500,
        name: "Ambassadeur",
    },
    LevelInfo {
        level: Level::Legend,
        min_points: 1000,
        name: "Legende",
    },
];

impl Level {
    /// Highest level whose minimum is at or below `points`
    pub fn for_points(points: i64) -> Level {
        LEVELS
            .iter()
            .rev()
            .find(|info| points >= info.min_points)
            .map_or(Level::Newbie, |info| info.level)
    }

    fn info(self) -> &'static LevelInfo {
        &LEVELS[self as usize]
    }

    /// Minimum cumulative points for this level
    pub fn min_points(self) -> i64 {
        self.info().min_points
    }

    /// Human-facing name
    pub fn display_name(self) -> &'static str {
        self.info().name
    }

    /// Next tier up, `None` at the top
    pub fn next(self) -> Option<Level> {
        LEVELS.get(self as usize + 1).map(|info| info.level)
    }

    /// Storage form (`NEWBIE`, `SUPER_CONTRIBUTOR`, ...)
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Newbie => "NEWBIE",
            Level::Contributor => "CONTRIBUTOR",
            Level::SuperContributor => "SUPER_CONTRIBUTOR",
            Level::Ambassador => "AMBASSADOR",
            Level::Legend => "LEGEND",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEWBIE" => Ok(Level::Newbie),
            "CONTRIBUTOR" => Ok(Level::Contributor),
            "SUPER_CONTRIBUTOR" => Ok(Level::SuperContributor),
            "AMBASSADOR" => Ok(Level::Ambassador),
            "LEGEND" => Ok(Level::Legend),
            other => Err(UnknownVariant::new("level", other)),
        }
    }
}

/// The tier after the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextLevel {
    pub level: Level,
    pub name: &'static str,
    pub min_points: i64,
}

/// Progress of a point total through the level table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelProgress {
    pub level: Level,
    /// Percentage through the current tier, 0..=100
    pub progress_to_next_level: u8,
    /// Zero at the top level
    pub points_to_next_level: i64,
    pub next_level: Option<NextLevel>,
}

impl LevelProgress {
    pub fn for_points(points: i64) -> Self {
        let points = points.max(0);
        let level = Level::for_points(points);

        let Some(next) = level.next() else {
            return Self {
                level,
                progress_to_next_level: 100,
                points_to_next_level: 0,
                next_level: None,
            };
        };

        let current_min = level.min_points();
        let next_min = next.min_points();
        let span = next_min - current_min;
        let scaled = (points - current_min) * 100;
        // round half up
        let percent = ((2 * scaled + span) / (2 * span)).clamp(0, 100);

        Self {
            level,
            progress_to_next_level: u8::try_from(percent).unwrap_or(100),
            points_to_next_level: next_min - points,
            next_level: Some(NextLevel {
                level: next,
                name: next.display_name(),
                min_points: next_min,
            }),
        }
    }
}
