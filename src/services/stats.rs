use std::sync::Arc;

use tinyrand::{Rand, Seeded, StdRand};
use tinyrand_std::ClockSeed;
use tracing::instrument;

use super::{ServiceResult, require_user};
use crate::db::models::stats::{FreudScore, UserDebateStats};
use crate::db::repositories::DebateStore;

#[derive(Debug, Clone)]
pub struct StatsService {
    store: Arc<dyn DebateStore>,
}

impl StatsService {
    pub fn new(store: Arc<dyn DebateStore>) -> Self {
        Self { store }
    }

    /// Recomputed in full on every call.
    #[instrument(skip(self))]
    pub async fn get_user_stats(&self, user_id: Option<&str>) -> ServiceResult<UserDebateStats> {
        let user_id = require_user(user_id)?;
        let stats = UserDebateStats::from(self.store.stats_rows(user_id).await?);
        tracing::debug!(
            total = stats.total_debates,
            completed = stats.completed_debates,
            "computed user stats"
        );

        Ok(stats)
    }

    #[instrument(skip(self))]
    pub async fn get_freud_score(&self, user_id: Option<&str>) -> ServiceResult<FreudScore> {
        let stats = self.get_user_stats(user_id).await?;
        let mut rand = StdRand::seed(ClockSeed::default().next_u64());

        Ok(FreudScore::from_stats(&stats, &mut rand))
    }
}
