use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::instrument;

use super::{DebateStore, Tx, empty_object, like_pattern, sql_fragment};
use crate::db::models::session::{
    DebateMessage, DebateSession, DebateSessionSummary, Difficulty, NewMessage, NewSession,
    SessionId, SessionStatus, SummaryRow,
};
use crate::db::models::stats::StatsRows;
use crate::db::{PgError, PgResult};

#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DebateStore for SessionRepository {
    #[instrument(skip(self, input), fields(topic = %input.topic))]
    async fn insert_session(&self, user_id: &str, input: &NewSession) -> PgResult<DebateSession> {
        match sqlx::query_as::<_, DebateSession>(&format!(
            r#"
            INSERT INTO debate_sessions (
                user_id,
                topic,
                topic_type,
                user_position,
                first_speaker,
                difficulty,
                debate_type,
                metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            sql_fragment::SESSION_FIELDS
        ))
        .bind(user_id)
        .bind(&input.topic)
        .bind(input.topic_type)
        .bind(input.user_position)
        .bind(input.first_speaker)
        .bind(input.difficulty)
        .bind(input.debate_type)
        .bind(Json(input.metadata.clone().unwrap_or_else(empty_object)))
        .fetch_one(&self.pool)
        .await
        {
            Ok(session) => Ok(session),
            Err(e) => {
                tracing::error!(error = ?e, "failure during session insertion");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self, input), fields(session_id = %input.session_id))]
    async fn insert_message(&self, input: &NewMessage) -> PgResult<DebateMessage> {
        let mut tx = Tx::begin(&self.pool).await?;

        if !tx.lock_session(&input.session_id).await? {
            tx.rollback().await?;
            return Err(PgError::MissingSession(input.session_id));
        }

        let message = tx.insert_message(input).await?;
        tx.recount_turns(&input.session_id).await?;
        tx.commit().await?;

        Ok(message)
    }

    #[instrument(skip(self))]
    async fn session_by_id(&self, id: &SessionId) -> PgResult<Option<DebateSession>> {
        Ok(sqlx::query_as::<_, DebateSession>(&format!(
            "SELECT {} FROM debate_sessions WHERE id = $1",
            sql_fragment::SESSION_FIELDS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn messages_for(&self, id: &SessionId) -> PgResult<Vec<DebateMessage>> {
        Ok(sqlx::query_as::<_, DebateMessage>(&format!(
            r#"
            SELECT {} FROM debate_messages
            WHERE session_id = $1
            ORDER BY turn_number ASC, "timestamp" ASC
            "#,
            sql_fragment::MESSAGE_FIELDS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn summaries(
        &self,
        user_id: &str,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> PgResult<(Vec<DebateSessionSummary>, i64)> {
        let pattern = search.map(like_pattern);

        let rows_query = format!(
            r#"
            SELECT
                {},
                COUNT(m.id) AS message_count,
                MAX(m."timestamp") AS last_message_at
            FROM debate_sessions s
            LEFT JOIN debate_messages m ON m.session_id = s.id
            WHERE s.user_id = $1
            AND ($2::TEXT IS NULL OR s.topic ILIKE $2 ESCAPE '\')
            GROUP BY s.id
            ORDER BY s.created_at DESC, s.id DESC
            LIMIT $3 OFFSET $4
            "#,
            sql_fragment::QUALIFIED_SESSION_FIELDS
        );

        let rows = sqlx::query_as::<_, SummaryRow>(&rows_query)
            .bind(user_id)
            .bind(pattern.as_deref())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool);

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM debate_sessions
            WHERE user_id = $1
            AND ($2::TEXT IS NULL OR topic ILIKE $2 ESCAPE '\')
            "#,
        )
        .bind(user_id)
        .bind(pattern.as_deref())
        .fetch_one(&self.pool);

        let (rows, total) = tokio::try_join!(rows, total)?;
        tracing::debug!(row_count = rows.len(), total, "fetched session summaries");

        Ok((
            rows.into_iter().map(SummaryRow::into_summary).collect(),
            total,
        ))
    }

    #[instrument(skip(self))]
    async fn delete_session(&self, id: &SessionId) -> PgResult<bool> {
        let mut tx = Tx::begin(&self.pool).await?;

        let removed_messages = tx.delete_messages(id).await?;
        let removed = tx.delete_session(id).await?;
        tx.commit().await?;

        tracing::debug!(removed_messages, removed, "deleted debate session");
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn set_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> PgResult<Option<DebateSession>> {
        Ok(sqlx::query_as::<_, DebateSession>(&format!(
            r#"
            UPDATE debate_sessions
            SET status = $2,
                completed_at = COALESCE($3::TIMESTAMPTZ, completed_at),
                session_duration = CASE
                    WHEN $3::TIMESTAMPTZ IS NULL THEN session_duration
                    ELSE COALESCE(
                        session_duration,
                        EXTRACT(EPOCH FROM ($3::TIMESTAMPTZ - created_at))::INTEGER
                    )
                END,
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING {}
            "#,
            sql_fragment::SESSION_FIELDS
        ))
        .bind(id)
        .bind(status)
        .bind(completed_at)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[instrument(skip(self, analysis))]
    async fn set_analysis(
        &self,
        id: &SessionId,
        analysis: &Value,
        completed_at: DateTime<Utc>,
    ) -> PgResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE debate_sessions
            SET status = CASE
                    WHEN status = 'active' THEN 'completed'::debate_status
                    ELSE status
                END,
                completed_at = CASE
                    WHEN status = 'active' THEN COALESCE(completed_at, $2::TIMESTAMPTZ)
                    ELSE completed_at
                END,
                session_duration = CASE
                    WHEN status = 'active' THEN COALESCE(
                        session_duration,
                        EXTRACT(EPOCH FROM ($2::TIMESTAMPTZ - created_at))::INTEGER
                    )
                    ELSE session_duration
                END,
                analysis_data = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(completed_at)
        .bind(Json(analysis))
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn session_ids_for(&self, user_id: &str) -> PgResult<Vec<SessionId>> {
        Ok(sqlx::query_scalar::<_, SessionId>(
            "SELECT id FROM debate_sessions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn analysis_for(&self, id: &SessionId) -> PgResult<Option<Value>> {
        let analysis = sqlx::query_scalar::<_, Option<Json<Value>>>(
            "SELECT analysis_data FROM debate_sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(analysis.flatten().map(|Json(v)| v))
    }

    #[instrument(skip(self))]
    async fn stats_rows(&self, user_id: &str) -> PgResult<StatsRows> {
        let by_status = sqlx::query_as::<_, (SessionStatus, i64)>(
            "SELECT status, COUNT(*) FROM debate_sessions WHERE user_id = $1 GROUP BY status",
        )
        .bind(user_id)
        .fetch_all(&self.pool);

        let by_difficulty = sqlx::query_as::<_, (Difficulty, i64)>(
            "SELECT difficulty, COUNT(*) FROM debate_sessions WHERE user_id = $1 GROUP BY difficulty",
        )
        .bind(user_id)
        .fetch_all(&self.pool);

        let total_turns = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(total_turns), 0)::BIGINT FROM debate_sessions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool);

        let user_turns = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM debate_messages m
            JOIN debate_sessions s ON s.id = m.session_id
            WHERE s.user_id = $1 AND m.speaker = 'user'
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool);

        let average_duration = sqlx::query_scalar::<_, Option<f64>>(
            r#"
            SELECT AVG(session_duration)::DOUBLE PRECISION FROM debate_sessions
            WHERE user_id = $1 AND status = 'completed' AND session_duration IS NOT NULL
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool);

        let (by_status, by_difficulty, total_turns, user_turns, average_duration) = tokio::try_join!(
            by_status,
            by_difficulty,
            total_turns,
            user_turns,
            average_duration
        )?;

        Ok(StatsRows {
            by_status,
            by_difficulty,
            total_turns,
            user_turns,
            average_duration,
        })
    }
}
