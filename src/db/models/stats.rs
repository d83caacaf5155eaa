use serde::{Deserialize, Serialize};
use tinyrand::Rand;

use super::session::{Difficulty, SessionStatus};

/// Raw aggregate rows for one user, as produced by the store's independent count queries.
#[derive(Debug, Clone, Default)]
pub struct StatsRows {
    pub by_status: Vec<(SessionStatus, i64)>,
    pub by_difficulty: Vec<(Difficulty, i64)>,
    pub total_turns: i64,
    pub user_turns: i64,
    pub average_duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyBreakdown {
    pub easy: i64,
    pub medium: i64,
    pub hard: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDebateStats {
    pub total_debates: i64,
    pub completed_debates: i64,
    pub active_debates: i64,
    pub abandoned_debates: i64,
    pub total_turns: i64,
    pub user_turns: i64,
    /// Seconds, averaged over completed sessions with a recorded duration.
    pub average_session_duration: f64,
    pub favorite_difficulty: Option<Difficulty>,
    pub debates_by_difficulty: DifficultyBreakdown,
}

impl From<StatsRows> for UserDebateStats {
    fn from(rows: StatsRows) -> Self {
        let count_of = |status| {
            rows.by_status
                .iter()
                .filter(|(s, _)| *s == status)
                .map(|(_, n)| n)
                .sum::<i64>()
        };

        let mut breakdown = DifficultyBreakdown::default();
        for (difficulty, count) in &rows.by_difficulty {
            match difficulty {
                Difficulty::Easy => breakdown.easy += count,
                Difficulty::Medium => breakdown.medium += count,
                Difficulty::Hard => breakdown.hard += count,
            }
        }

        Self {
            total_debates: rows.by_status.iter().map(|(_, n)| n).sum(),
            completed_debates: count_of(SessionStatus::Completed),
            active_debates: count_of(SessionStatus::Active),
            abandoned_debates: count_of(SessionStatus::Abandoned),
            total_turns: rows.total_turns,
            user_turns: rows.user_turns,
            average_session_duration: rows.average_duration.unwrap_or(0.0),
            favorite_difficulty: breakdown.favorite(),
            debates_by_difficulty: breakdown,
        }
    }
}

impl DifficultyBreakdown {
    /// Most-played difficulty; the easier difficulty wins a tie.
    pub fn favorite(&self) -> Option<Difficulty> {
        [
            (Difficulty::Easy, self.easy),
            (Difficulty::Medium, self.medium),
            (Difficulty::Hard, self.hard),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .fold(None, |best: Option<(Difficulty, i64)>, (d, n)| match best {
            Some((_, top)) if top >= n => best,
            _ => Some((d, n)),
        })
        .map(|(d, _)| d)
    }
}

const JITTER: u32 = 5;

/// Personality-styled triad shown on the profile page. Not a psychological measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreudScore {
    pub id: u8,
    pub ego: u8,
    pub superego: u8,
}

impl FreudScore {
    pub fn from_stats(stats: &UserDebateStats, rand: &mut impl Rand) -> Self {
        if stats.total_debates == 0 {
            return Self {
                id: 0,
                ego: 0,
                superego: 0,
            };
        }

        let total = stats.total_debates as f64;
        let superego = stats.completed_debates as f64 / total * 100.0;
        let ego = (stats.user_turns as f64 / total * 10.0).min(100.0);
        let id = (stats.abandoned_debates as f64 / total * 100.0
            + stats.debates_by_difficulty.hard as f64 / total * 50.0)
            .min(100.0);

        Self {
            id: jittered(id, rand),
            ego: jittered(ego, rand),
            superego: jittered(superego, rand),
        }
    }
}

fn jittered(base: f64, rand: &mut impl Rand) -> u8 {
    let offset = rand.next_lim_u32(JITTER * 2 + 1) as i64 - JITTER as i64;
    (base.round() as i64 + offset).clamp(0, 100) as u8
}
