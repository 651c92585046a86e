//! Level, streak and XP rules. Everything here is a pure function of its
//! inputs; persisting the result is up to the caller.

use chrono::NaiveDate;
use serde::Serialize;

use super::data::GameStats;

pub const XP_PER_DAY: u64 = 10;

/// XP needed to get through `level` alone.
pub fn xp_for_level(level: u32) -> u64 {
    u64::from(level) * 10
}

/// Total XP at which `level` is finished and `level + 1` begins:
/// 10 + 20 + … + 10·level. Saturates instead of overflowing.
pub fn cumulative_threshold(level: u32) -> u64 {
    threshold(u64::from(level)).unwrap_or(u64::MAX)
}

fn threshold(finished: u64) -> Option<u64> {
    finished.checked_mul(finished + 1)?.checked_mul(5)
}

/// The level a player with `xp` points has reached. Solves
/// `5·n·(n + 1) <= xp` for the number of finished levels `n`, so the cost
/// does not grow with `xp`.
pub fn level_for_xp(xp: u64) -> u32 {
    let estimate = ((1.0 + 0.8 * xp as f64).sqrt() - 1.0) / 2.0;
    let mut finished = estimate as u64;

    // The float estimate can be off by one either way near big values.
    while finished > 0 && threshold(finished).map_or(true, |t| t > xp) {
        finished -= 1;
    }
    while threshold(finished + 1).map_or(false, |t| t <= xp) {
        finished += 1;
    }

    u32::try_from(finished + 1).unwrap_or(u32::MAX)
}

/// Counts one completion on `today`. A second call for the same day
/// returns the stats unchanged.
pub fn apply_completion(stats: &GameStats, today: NaiveDate) -> GameStats {
    if stats.last_completed_date == Some(today) {
        return stats.clone();
    }

    let streak = match stats.last_completed_date {
        Some(last) if last.succ_opt() == Some(today) => stats.streak.saturating_add(1),
        _ => 1,
    };

    let xp = stats.xp.saturating_add(XP_PER_DAY);
    let level = level_for_xp(xp).max(stats.level);

    GameStats {
        xp,
        level,
        streak,
        last_completed_date: Some(today),
    }
}

/// Brings `level` back in line with `xp`, for stats read from outside.
pub fn normalize(stats: GameStats) -> GameStats {
    GameStats {
        level: level_for_xp(stats.xp),
        ..stats
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub level: u32,
    pub xp: u64,
    pub xp_in_level: u64,
    pub xp_for_level: u64,
    pub streak: u32,
}

pub fn progress(stats: &GameStats) -> LevelProgress {
    let level = stats.level.max(1);
    let reached = cumulative_threshold(level - 1);

    LevelProgress {
        level,
        xp: stats.xp,
        xp_in_level: stats.xp.saturating_sub(reached),
        xp_for_level: xp_for_level(level),
        streak: stats.streak,
    }
}
