use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::types::Json;
use uuid::Uuid;

use super::{DebateStore, empty_object};
use crate::db::models::session::{
    DebateMessage, DebateSession, DebateSessionSummary, MessageId, NewMessage, NewSession,
    SessionId, SessionStatus, Speaker, SummaryRow,
};
use crate::db::models::stats::StatsRows;
use crate::db::{PgError, PgResult};

/// In-process `DebateStore` used by service and route tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

#[derive(Debug, Default)]
struct Tables {
    sessions: Vec<DebateSession>,
    messages: Vec<DebateMessage>,
    clock: i64,
}

impl Tables {
    /// Strictly increasing timestamps so `created_at` ordering is deterministic.
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000) + Duration::seconds(self.clock)
    }

    fn session_mut(&mut self, id: &SessionId) -> Option<&mut DebateSession> {
        self.sessions.iter_mut().find(|s| s.id == *id)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn message_count(&self, id: &SessionId) -> usize {
        self.tables()
            .messages
            .iter()
            .filter(|m| m.session_id == *id)
            .count()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_write(&self) -> PgResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PgError::SqlxError(sqlx::Error::Protocol(
                "connection refused".into(),
            )));
        }
        Ok(())
    }

    fn check_read(&self) -> PgResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PgError::SqlxError(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl DebateStore for MemoryStore {
    async fn insert_session(&self, user_id: &str, input: &NewSession) -> PgResult<DebateSession> {
        self.check_write()?;
        let mut tables = self.tables();
        let now = tables.tick();

        let session = DebateSession {
            id: SessionId(Uuid::new_v4()),
            user_id: user_id.to_string(),
            topic: input.topic.clone(),
            topic_type: input.topic_type,
            user_position: input.user_position,
            first_speaker: input.first_speaker,
            difficulty: input.difficulty,
            debate_type: input.debate_type,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            completed_at: None,
            total_turns: 0,
            session_duration: None,
            metadata: Json(input.metadata.clone().unwrap_or_else(empty_object)),
            analysis_data: None,
        };

        tables.sessions.push(session.clone());
        Ok(session)
    }

    async fn insert_message(&self, input: &NewMessage) -> PgResult<DebateMessage> {
        self.check_write()?;
        let mut tables = self.tables();
        if tables.session_mut(&input.session_id).is_none() {
            return Err(PgError::MissingSession(input.session_id));
        }

        let message = DebateMessage {
            id: MessageId(Uuid::new_v4()),
            session_id: input.session_id,
            speaker: input.speaker,
            message_text: input.message_text.clone(),
            turn_number: input.turn_number,
            timestamp: tables.tick(),
            processing_time: input.processing_time,
            confidence_score: input.confidence_score,
            relevance_score: input.relevance_score,
            message_type: input.message_type,
            metadata: Json(input.metadata.clone().unwrap_or_else(empty_object)),
        };
        tables.messages.push(message.clone());

        let count = tables
            .messages
            .iter()
            .filter(|m| m.session_id == input.session_id)
            .count() as i32;
        let now = tables.tick();
        if let Some(session) = tables.session_mut(&input.session_id) {
            session.total_turns = count;
            session.updated_at = now;
        }

        Ok(message)
    }

    async fn session_by_id(&self, id: &SessionId) -> PgResult<Option<DebateSession>> {
        self.check_read()?;
        Ok(self.tables().sessions.iter().find(|s| s.id == *id).cloned())
    }

    async fn messages_for(&self, id: &SessionId) -> PgResult<Vec<DebateMessage>> {
        self.check_read()?;
        let mut messages: Vec<_> = self
            .tables()
            .messages
            .iter()
            .filter(|m| m.session_id == *id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.turn_number, m.timestamp));

        Ok(messages)
    }

    async fn summaries(
        &self,
        user_id: &str,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> PgResult<(Vec<DebateSessionSummary>, i64)> {
        self.check_read()?;
        let tables = self.tables();
        let needle = search.map(str::to_lowercase);

        let mut matching: Vec<&DebateSession> = tables
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .filter(|s| match &needle {
                Some(n) => s.topic.to_lowercase().contains(n.as_str()),
                None => true,
            })
            .collect();
        matching.sort_by(|a, b| (b.created_at, b.id.0).cmp(&(a.created_at, a.id.0)));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|s| {
                let messages = tables.messages.iter().filter(|m| m.session_id == s.id);
                SummaryRow {
                    session: s.clone(),
                    message_count: messages.clone().count() as i64,
                    last_message_at: messages.map(|m| m.timestamp).max(),
                }
                .into_summary()
            })
            .collect();

        Ok((page, total))
    }

    async fn delete_session(&self, id: &SessionId) -> PgResult<bool> {
        self.check_write()?;
        let mut tables = self.tables();
        tables.messages.retain(|m| m.session_id != *id);

        let before = tables.sessions.len();
        tables.sessions.retain(|s| s.id != *id);
        Ok(tables.sessions.len() < before)
    }

    async fn set_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> PgResult<Option<DebateSession>> {
        self.check_write()?;
        let mut tables = self.tables();
        let now = tables.tick();

        let Some(session) = tables.session_mut(id) else {
            return Ok(None);
        };
        if session.status != SessionStatus::Active {
            return Ok(None);
        }

        session.status = status;
        session.updated_at = now;
        if let Some(at) = completed_at {
            session.completed_at = Some(at);
            session
                .session_duration
                .get_or_insert((at - session.created_at).num_seconds() as i32);
        }

        Ok(Some(session.clone()))
    }

    async fn set_analysis(
        &self,
        id: &SessionId,
        analysis: &Value,
        completed_at: DateTime<Utc>,
    ) -> PgResult<bool> {
        self.check_write()?;
        let mut tables = self.tables();

        let Some(session) = tables.session_mut(id) else {
            return Ok(false);
        };

        if session.status == SessionStatus::Active {
            session.status = SessionStatus::Completed;
            let completed_at = *session.completed_at.get_or_insert(completed_at);
            session
                .session_duration
                .get_or_insert((completed_at - session.created_at).num_seconds() as i32);
        }
        session.analysis_data = Some(Json(analysis.clone()));

        Ok(true)
    }

    async fn analysis_for(&self, id: &SessionId) -> PgResult<Option<Value>> {
        self.check_read()?;
        Ok(self
            .tables()
            .sessions
            .iter()
            .find(|s| s.id == *id)
            .and_then(|s| s.analysis_data.clone())
            .map(|Json(v)| v))
    }

    async fn session_ids_for(&self, user_id: &str) -> PgResult<Vec<SessionId>> {
        self.check_read()?;
        Ok(self
            .tables()
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect())
    }

    async fn stats_rows(&self, user_id: &str) -> PgResult<StatsRows> {
        self.check_read()?;
        let tables = self.tables();
        let owned: Vec<&DebateSession> = tables
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .collect();

        let mut rows = StatsRows::default();
        for session in &owned {
            bump(&mut rows.by_status, session.status);
            bump(&mut rows.by_difficulty, session.difficulty);
            rows.total_turns += session.total_turns as i64;
        }

        rows.user_turns = tables
            .messages
            .iter()
            .filter(|m| m.speaker == Speaker::User)
            .filter(|m| owned.iter().any(|s| s.id == m.session_id))
            .count() as i64;

        let durations: Vec<f64> = owned
            .iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .filter_map(|s| s.session_duration)
            .map(f64::from)
            .collect();
        if !durations.is_empty() {
            rows.average_duration = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }

        Ok(rows)
    }
}

fn bump<K: PartialEq>(counts: &mut Vec<(K, i64)>, key: K) {
    match counts.iter_mut().find(|(k, _)| *k == key) {
        Some((_, n)) => *n += 1,
        None => counts.push((key, 1)),
    }
}
