use core::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Result as SqlxResult, Transaction};
use tracing::instrument;

use crate::db::PgResult;
use crate::db::models::session::{
    DebateMessage, DebateSession, DebateSessionSummary, NewMessage, NewSession, SessionId,
    SessionStatus,
};
use crate::db::models::stats::StatsRows;

#[cfg(test)]
pub mod memory;
pub mod session;

/// Storage operations behind the session, stats and analysis services.
///
/// Implementations own atomicity: `insert_message` must leave `total_turns` equal to the
/// session's message count, and `delete_session` must never leave a session without its messages
/// half-deleted.
#[async_trait]
pub trait DebateStore: Send + Sync + fmt::Debug {
    async fn insert_session(&self, user_id: &str, input: &NewSession) -> PgResult<DebateSession>;

    /// Inserts the message and writes the recounted `total_turns` back to its session.
    async fn insert_message(&self, input: &NewMessage) -> PgResult<DebateMessage>;

    async fn session_by_id(&self, id: &SessionId) -> PgResult<Option<DebateSession>>;

    /// Messages ordered by `turn_number`, ascending.
    async fn messages_for(&self, id: &SessionId) -> PgResult<Vec<DebateMessage>>;

    /// One page of summaries, newest first, and the total number of matching sessions.
    /// `search` filters on a case-insensitive substring of the topic.
    async fn summaries(
        &self,
        user_id: &str,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> PgResult<(Vec<DebateSessionSummary>, i64)>;

    /// Returns `false` when no session had that id.
    async fn delete_session(&self, id: &SessionId) -> PgResult<bool>;

    /// Moves an `active` session to `status`. Returns `None` when the session is missing or no
    /// longer active.
    async fn set_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> PgResult<Option<DebateSession>>;

    /// Stores the analysis report on the session and completes it if it is still `active`.
    /// Returns `false` when no session had that id.
    async fn set_analysis(
        &self,
        id: &SessionId,
        analysis: &Value,
        completed_at: DateTime<Utc>,
    ) -> PgResult<bool>;

    async fn analysis_for(&self, id: &SessionId) -> PgResult<Option<Value>>;

    async fn session_ids_for(&self, user_id: &str) -> PgResult<Vec<SessionId>>;

    async fn stats_rows(&self, user_id: &str) -> PgResult<StatsRows>;
}

pub struct Tx {
    inner: Option<Transaction<'static, Postgres>>,
}

impl Tx {
    #[instrument(skip(pool))]
    pub async fn begin(pool: &Pool<Postgres>) -> SqlxResult<Self> {
        let inner = pool.begin().await?;
        Ok(Self { inner: Some(inner) })
    }

    #[instrument(skip(self))]
    pub async fn commit(&mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.commit().await
        } else {
            Err(sqlx::Error::Protocol("Transaction already completed".into()))
        }
    }

    #[instrument(skip(self))]
    pub async fn rollback(&mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.rollback().await
        } else {
            Err(sqlx::Error::Protocol("Transaction already completed".into()))
        }
    }

    fn inner_mut(&mut self) -> SqlxResult<&mut Transaction<'static, Postgres>> {
        self.inner
            .as_mut()
            .ok_or_else(|| sqlx::Error::Protocol("Transaction already completed".into()))
    }

    /// Locks the session row so concurrent appends recount one after another.
    #[instrument(skip(self))]
    pub async fn lock_session(&mut self, id: &SessionId) -> SqlxResult<bool> {
        let found = sqlx::query_scalar::<_, SessionId>(
            "SELECT id FROM debate_sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut **self.inner_mut()?)
        .await?;

        Ok(found.is_some())
    }

    #[instrument(skip(self, item), fields(session_id = %item.session_id, turn = item.turn_number))]
    pub async fn insert_message(&mut self, item: &NewMessage) -> SqlxResult<DebateMessage> {
        sqlx::query_as::<_, DebateMessage>(&format!(
            r#"
            INSERT INTO debate_messages (
                session_id,
                speaker,
                message_text,
                turn_number,
                processing_time,
                confidence_score,
                relevance_score,
                message_type,
                metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            sql_fragment::MESSAGE_FIELDS
        ))
        .bind(item.session_id)
        .bind(item.speaker)
        .bind(&item.message_text)
        .bind(item.turn_number)
        .bind(item.processing_time)
        .bind(item.confidence_score)
        .bind(item.relevance_score)
        .bind(item.message_type)
        .bind(Json(item.metadata.clone().unwrap_or_else(empty_object)))
        .fetch_one(&mut **self.inner_mut()?)
        .await
    }

    #[instrument(skip(self))]
    pub async fn recount_turns(&mut self, id: &SessionId) -> SqlxResult<i32> {
        let total = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE debate_sessions
            SET total_turns = (SELECT COUNT(*) FROM debate_messages WHERE session_id = $1)::INTEGER,
                updated_at = NOW()
            WHERE id = $1
            RETURNING total_turns
            "#,
        )
        .bind(id)
        .fetch_one(&mut **self.inner_mut()?)
        .await?;

        tracing::debug!(total_turns = total, "recalculated turn count for session");
        Ok(total)
    }

    #[instrument(skip(self))]
    pub async fn delete_messages(&mut self, id: &SessionId) -> SqlxResult<u64> {
        let res = sqlx::query("DELETE FROM debate_messages WHERE session_id = $1")
            .bind(id)
            .execute(&mut **self.inner_mut()?)
            .await?;

        Ok(res.rows_affected())
    }

    #[instrument(skip(self))]
    pub async fn delete_session(&mut self, id: &SessionId) -> SqlxResult<bool> {
        let res = sqlx::query("DELETE FROM debate_sessions WHERE id = $1")
            .bind(id)
            .execute(&mut **self.inner_mut()?)
            .await?;

        Ok(res.rows_affected() > 0)
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Escapes `LIKE` wildcards so a search term only ever matches literally.
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');

    escaped
}

pub mod sql_fragment {
    pub const SESSION_FIELDS: &str = r#"
        id,
        user_id,
        topic,
        topic_type,
        user_position,
        first_speaker,
        difficulty,
        debate_type,
        status,
        created_at,
        updated_at,
        completed_at,
        total_turns,
        session_duration,
        metadata,
        analysis_data
    "#;

    pub const QUALIFIED_SESSION_FIELDS: &str = r#"
        s.id,
        s.user_id,
        s.topic,
        s.topic_type,
        s.user_position,
        s.first_speaker,
        s.difficulty,
        s.debate_type,
        s.status,
        s.created_at,
        s.updated_at,
        s.completed_at,
        s.total_turns,
        s.session_duration,
        s.metadata,
        s.analysis_data
    "#;

    pub const MESSAGE_FIELDS: &str = r#"
        id,
        session_id,
        speaker,
        message_text,
        turn_number,
        "timestamp",
        processing_time,
        confidence_score,
        relevance_score,
        message_type,
        metadata
    "#;
}
