use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct SessionId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct MessageId(pub Uuid);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "topic_type", rename_all = "lowercase")]
pub enum TopicType {
    #[default]
    Custom,
    Scenario,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "debate_position", rename_all = "lowercase")]
pub enum Position {
    For,
    Against,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "debate_speaker", rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "debate_difficulty", rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "debate_type", rename_all = "lowercase")]
pub enum DebateType {
    Chanakya,
    #[default]
    Instant,
    Human,
    Mun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "debate_status", rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "message_type", rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    DebateTurn,
    OpeningStatement,
    ClosingStatement,
    Clarification,
}

/// Base `debate_sessions` table model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DebateSession {
    pub id: SessionId,
    pub user_id: String,
    pub topic: String,
    pub topic_type: TopicType,
    pub user_position: Position,
    pub first_speaker: Speaker,
    pub difficulty: Difficulty,
    pub debate_type: DebateType,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_turns: i32,
    pub session_duration: Option<i32>,
    pub metadata: Json<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_data: Option<Json<Value>>,
}

/// Base `debate_messages` table model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DebateMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub speaker: Speaker,
    pub message_text: String,
    pub turn_number: i32,
    pub timestamp: DateTime<Utc>,
    pub processing_time: Option<i32>,
    pub confidence_score: Option<f64>,
    pub relevance_score: Option<f64>,
    pub message_type: MessageType,
    pub metadata: Json<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub topic: String,
    #[serde(default)]
    pub topic_type: TopicType,
    pub user_position: Position,
    pub first_speaker: Speaker,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub debate_type: DebateType,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    /// Taken from the route rather than the request body.
    #[serde(default, skip_serializing)]
    pub session_id: SessionId,
    pub speaker: Speaker,
    pub message_text: String,
    pub turn_number: i32,
    #[serde(default)]
    pub processing_time: Option<i32>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub relevance_score: Option<f64>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Session plus its messages in turn order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session: DebateSession,
    pub messages: Vec<DebateMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayStatus {
    Completed,
    #[serde(rename = "In Progress")]
    InProgress,
    Started,
    Abandoned,
}

impl DisplayStatus {
    pub fn derive(status: SessionStatus, total_turns: i32) -> Self {
        match status {
            SessionStatus::Completed => Self::Completed,
            SessionStatus::Abandoned => Self::Abandoned,
            SessionStatus::Active if total_turns > 0 => Self::InProgress,
            SessionStatus::Active => Self::Started,
        }
    }
}

/// Read-optimised projection used by history listings and search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSessionSummary {
    pub id: SessionId,
    pub topic: String,
    pub topic_type: TopicType,
    pub user_position: Position,
    pub first_speaker: Speaker,
    pub difficulty: Difficulty,
    pub debate_type: DebateType,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_turns: i32,
    pub session_duration: Option<i32>,
    pub message_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub display_status: DisplayStatus,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SummaryRow {
    #[sqlx(flatten)]
    pub session: DebateSession,
    pub message_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl SummaryRow {
    pub fn into_summary(self) -> DebateSessionSummary {
        let s = self.session;
        DebateSessionSummary {
            display_status: DisplayStatus::derive(s.status, s.total_turns),
            id: s.id,
            topic: s.topic,
            topic_type: s.topic_type,
            user_position: s.user_position,
            first_speaker: s.first_speaker,
            difficulty: s.difficulty,
            debate_type: s.debate_type,
            status: s.status,
            created_at: s.created_at,
            updated_at: s.updated_at,
            completed_at: s.completed_at,
            total_turns: s.total_turns,
            session_duration: s.session_duration,
            message_count: self.message_count,
            last_message_at: self.last_message_at,
        }
    }
}

impl SessionStatus {
    /// `active` is the only state with outgoing transitions.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Active, SessionStatus::Completed)
                | (SessionStatus::Active, SessionStatus::Abandoned)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        SessionId(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
