use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use super::{ServiceError, ServiceResult, require_user};
use crate::db::models::analysis::{DebateAnalysisData, StoredAnalysis};
use crate::db::models::session::SessionId;
use crate::db::redis::{CacheErr, KvStore};
use crate::db::repositories::DebateStore;

pub const KEY_PREFIX: &str = "debate_analysis_";

pub fn cache_key(session_id: &SessionId) -> String {
    format!("{KEY_PREFIX}{session_id}")
}

/// Post-debate reports. The key-value cache is authoritative; the session row's `analysis_data`
/// column is a best-effort backup that may lag behind it.
#[derive(Debug, Clone)]
pub struct AnalysisCache {
    kv: Arc<dyn KvStore>,
    store: Arc<dyn DebateStore>,
}

impl AnalysisCache {
    pub fn new(kv: Arc<dyn KvStore>, store: Arc<dyn DebateStore>) -> Self {
        Self { kv, store }
    }

    #[instrument(skip(self, analysis), fields(score = analysis.overall_score))]
    pub async fn store(
        &self,
        session_id: &SessionId,
        analysis: DebateAnalysisData,
    ) -> ServiceResult<StoredAnalysis> {
        let stored = StoredAnalysis {
            analysis,
            stored_at: Utc::now(),
            session_id: *session_id,
        };

        let encoded = serde_json::to_string(&stored).map_err(CacheErr::from)?;
        self.kv.set(&cache_key(session_id), &encoded).await?;
        tracing::info!(session_id = %session_id, "analysis cached");

        self.mirror_to_session(&stored).await;
        Ok(stored)
    }

    /// Marks the session completed and copies the report onto it. Failures are only logged.
    async fn mirror_to_session(&self, stored: &StoredAnalysis) {
        let value = match serde_json::to_value(&stored.analysis) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = ?e, "unable to encode analysis for session row");
                return;
            }
        };

        match self
            .store
            .set_analysis(&stored.session_id, &value, stored.stored_at)
            .await
        {
            Ok(true) => tracing::debug!("analysis mirrored to session row"),
            Ok(false) => {
                tracing::warn!(session_id = %stored.session_id, "no session row to mirror analysis onto")
            }
            Err(e) => {
                tracing::warn!(session_id = %stored.session_id, error = ?e, "failed to mirror analysis to session row")
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, session_id: &SessionId) -> ServiceResult<DebateAnalysisData> {
        match self.kv.get(&cache_key(session_id)).await {
            Ok(Some(raw)) => match serde_json::from_str::<StoredAnalysis>(&raw) {
                Ok(stored) => return Ok(stored.analysis),
                Err(e) => tracing::warn!(error = ?e, "undecodable cache entry, trying session row"),
            },
            Ok(None) => tracing::debug!("analysis cache miss"),
            Err(e) => tracing::warn!(error = ?e, "analysis cache unavailable, trying session row"),
        }

        let Some(value) = self.store.analysis_for(session_id).await? else {
            return Err(not_found(session_id));
        };

        serde_json::from_value::<DebateAnalysisData>(value).map_err(|e| {
            tracing::warn!(error = ?e, "session row holds an undecodable analysis");
            not_found(session_id)
        })
    }

    /// Every cached report for the caller's sessions, newest first.
    #[instrument(skip(self))]
    pub async fn list_all(&self, user_id: Option<&str>) -> ServiceResult<Vec<StoredAnalysis>> {
        let user_id = require_user(user_id)?;
        let owned: HashSet<String> = self
            .store
            .session_ids_for(user_id)
            .await?
            .iter()
            .map(cache_key)
            .collect();

        let keys = self.kv.keys_with_prefix(KEY_PREFIX).await?;

        let mut entries = Vec::with_capacity(owned.len());
        for key in keys.into_iter().filter(|k| owned.contains(k)) {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };

            match serde_json::from_str::<StoredAnalysis>(&raw) {
                Ok(stored) => entries.push(stored),
                Err(e) => tracing::warn!(key = %key, error = ?e, "skipping undecodable analysis entry"),
            }
        }

        entries.sort_by(|a, b| b.stored_at.cmp(&a.stored_at));
        Ok(entries)
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, session_id: &SessionId) -> ServiceResult<bool> {
        Ok(self.kv.delete(&cache_key(session_id)).await?)
    }
}

fn not_found(session_id: &SessionId) -> ServiceError {
    ServiceError::not_found(format!("No analysis found for session '{session_id}'"))
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;
    use crate::db::models::analysis::sample_analysis;
    use crate::db::models::session::{Difficulty, SessionStatus};
    use crate::db::redis::memory::MemoryKv;
    use crate::db::repositories::memory::MemoryStore;
    use crate::services::history::SessionService;
    use crate::services::history::test::new_session;

    struct Fixture {
        cache: AnalysisCache,
        kv: Arc<MemoryKv>,
        store: Arc<MemoryStore>,
        sessions: SessionService,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(MemoryKv::new());
        let store = Arc::new(MemoryStore::new());
        Fixture {
            cache: AnalysisCache::new(kv.clone(), store.clone()),
            sessions: SessionService::new(store.clone()),
            kv,
            store,
        }
    }

    #[test]
    fn test_cache_key_format() {
        let id = SessionId(uuid::Uuid::nil());
        assert_eq!(
            cache_key(&id),
            "debate_analysis_00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    async fn test_store_caches_and_completes_session() {
        let f = fixture();
        let session = f
            .sessions
            .create_session(Some("user-1"), new_session("AI Safety", Difficulty::Medium))
            .await
            .unwrap();

        let stored = f.cache.store(&session.id, sample_analysis(84.0)).await.unwrap();
        assert_eq!(stored.session_id, session.id);
        assert!(f.kv.contains(&cache_key(&session.id)));

        let row = f.sessions.get_session(&session.id).await.unwrap().session;
        assert_eq!(row.status, SessionStatus::Completed);
        assert!(row.completed_at.is_some());
        assert!(row.analysis_data.is_some());

        let fetched = f.cache.get(&session.id).await.unwrap();
        assert_eq!(fetched.overall_score, 84.0);
    }

    #[tokio::test]
    async fn test_store_succeeds_when_session_write_fails() {
        let f = fixture();
        f.store.fail_writes(true);
        let id = SessionId(uuid::Uuid::new_v4());

        f.cache.store(&id, sample_analysis(60.0)).await.unwrap();
        assert_eq!(f.cache.get(&id).await.unwrap().overall_score, 60.0);
    }

    #[tokio::test]
    async fn test_store_fails_when_cache_is_down() {
        let f = fixture();
        f.kv.set_offline(true);

        let err = f
            .cache
            .store(&SessionId::default(), sample_analysis(60.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Cache(_)));
    }

    #[tokio::test]
    async fn test_get_falls_back_to_session_row() {
        let f = fixture();
        let session = f
            .sessions
            .create_session(Some("user-1"), new_session("AI Safety", Difficulty::Medium))
            .await
            .unwrap();

        f.cache.store(&session.id, sample_analysis(71.0)).await.unwrap();
        // another device: cache empty, row still carries the report
        assert!(f.cache.remove(&session.id).await.unwrap());

        let fetched = f.cache.get(&session.id).await.unwrap();
        assert_eq!(fetched.overall_score, 71.0);
    }

    #[tokio::test]
    async fn test_get_missing_everywhere_is_not_found() {
        let f = fixture();
        let session = f
            .sessions
            .create_session(Some("user-1"), new_session("AI Safety", Difficulty::Medium))
            .await
            .unwrap();

        assert!(matches!(
            f.cache.get(&session.id).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            f.cache.get(&SessionId::default()).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_list_all_orders_newest_first_and_skips_garbage() {
        let f = fixture();
        let now = Utc::now();

        for (offset, score) in [(3, 50.0), (1, 90.0), (2, 70.0)] {
            let session = f
                .sessions
                .create_session(Some("user-1"), new_session("AI Safety", Difficulty::Medium))
                .await
                .unwrap();
            let entry = StoredAnalysis {
                analysis: sample_analysis(score),
                stored_at: now - Duration::minutes(offset),
                session_id: session.id,
            };
            f.kv.raw_insert(
                &cache_key(&session.id),
                &serde_json::to_string(&entry).unwrap(),
            );
        }

        let broken = f
            .sessions
            .create_session(Some("user-1"), new_session("Broken", Difficulty::Easy))
            .await
            .unwrap();
        f.kv.raw_insert(&cache_key(&broken.id), "{not json");
        f.kv.raw_insert("unrelated_key", "{}");

        let listed = f.cache.list_all(Some("user-1")).await.unwrap();
        let scores: Vec<f64> = listed.iter().map(|s| s.analysis.overall_score).collect();
        assert_eq!(scores, vec![90.0, 70.0, 50.0]);
    }

    #[tokio::test]
    async fn test_list_all_only_returns_callers_reports() {
        let f = fixture();
        let mine = f
            .sessions
            .create_session(Some("user-1"), new_session("AI Safety", Difficulty::Medium))
            .await
            .unwrap();
        let theirs = f
            .sessions
            .create_session(Some("user-2"), new_session("Space Policy", Difficulty::Hard))
            .await
            .unwrap();

        f.cache.store(&mine.id, sample_analysis(80.0)).await.unwrap();
        f.cache.store(&theirs.id, sample_analysis(40.0)).await.unwrap();
        // entry for a session that no longer exists in the store
        f.cache
            .store(&SessionId(uuid::Uuid::new_v4()), sample_analysis(10.0))
            .await
            .unwrap();

        let listed = f.cache.list_all(Some("user-1")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, mine.id);

        let listed = f.cache.list_all(Some("user-2")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, theirs.id);

        assert!(f.cache.list_all(Some("user-3")).await.unwrap().is_empty());
        assert!(matches!(
            f.cache.list_all(None).await.unwrap_err(),
            ServiceError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_store_keeps_abandoned_session_abandoned() {
        let f = fixture();
        let session = f
            .sessions
            .create_session(Some("user-1"), new_session("AI Safety", Difficulty::Medium))
            .await
            .unwrap();
        f.sessions
            .update_status(&session.id, SessionStatus::Abandoned)
            .await
            .unwrap();

        f.cache.store(&session.id, sample_analysis(65.0)).await.unwrap();

        let row = f.sessions.get_session(&session.id).await.unwrap().session;
        assert_eq!(row.status, SessionStatus::Abandoned);
        assert!(row.completed_at.is_none());
        assert!(row.analysis_data.is_some());
    }
}
