use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use super::{ServiceError, ServiceResult, require_user};
use crate::db::PgError;
use crate::db::models::session::{
    DebateMessage, DebateSession, DebateSessionSummary, NewMessage, NewSession, SessionDetail,
    SessionId, SessionStatus,
};
use crate::db::models::{PaginatedResponse, Pagination};
use crate::db::repositories::DebateStore;

/// Debate session lifecycle, message log and history listings.
#[derive(Debug, Clone)]
pub struct SessionService {
    store: Arc<dyn DebateStore>,
}

impl SessionService {
    pub fn new(store: Arc<dyn DebateStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, input), fields(topic = %input.topic))]
    pub async fn create_session(
        &self,
        user_id: Option<&str>,
        input: NewSession,
    ) -> ServiceResult<DebateSession> {
        let user_id = require_user(user_id)?;
        if input.topic.trim().is_empty() {
            return Err(ServiceError::validation("Topic is required"));
        }

        let session = self.store.insert_session(user_id, &input).await?;
        tracing::info!(session_id = %session.id, "debate session created");

        Ok(session)
    }

    #[instrument(skip(self, input), fields(session_id = %input.session_id, turn = input.turn_number))]
    pub async fn add_message(&self, input: NewMessage) -> ServiceResult<DebateMessage> {
        if input.message_text.trim().is_empty() {
            return Err(ServiceError::validation("Message text is required"));
        }

        match self.store.insert_message(&input).await {
            Ok(message) => Ok(message),
            Err(PgError::MissingSession(id)) => Err(ServiceError::not_found(format!(
                "Debate session '{id}' not found"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_history(
        &self,
        user_id: Option<&str>,
        page: Pagination,
    ) -> ServiceResult<PaginatedResponse<DebateSessionSummary>> {
        let user_id = require_user(user_id)?;
        self.page_of(user_id, None, page).await
    }

    /// Blank terms list the full history.
    #[instrument(skip(self))]
    pub async fn search_sessions(
        &self,
        term: &str,
        user_id: Option<&str>,
        page: Pagination,
    ) -> ServiceResult<PaginatedResponse<DebateSessionSummary>> {
        let user_id = require_user(user_id)?;
        let term = Some(term.trim()).filter(|t| !t.is_empty());

        self.page_of(user_id, term, page).await
    }

    async fn page_of(
        &self,
        user_id: &str,
        search: Option<&str>,
        page: Pagination,
    ) -> ServiceResult<PaginatedResponse<DebateSessionSummary>> {
        let page = page.clamped();
        let (items, total) = self
            .store
            .summaries(user_id, search, page.limit, page.offset())
            .await?;

        Ok(PaginatedResponse::new(items, total, page))
    }

    #[instrument(skip(self))]
    pub async fn get_session(&self, id: &SessionId) -> ServiceResult<SessionDetail> {
        let session = self.find(id).await?;
        let messages = self.store.messages_for(id).await?;

        Ok(SessionDetail { session, messages })
    }

    #[instrument(skip(self))]
    pub async fn get_messages(&self, id: &SessionId) -> ServiceResult<Vec<DebateMessage>> {
        Ok(self.store.messages_for(id).await?)
    }

    #[instrument(skip(self))]
    pub async fn delete_session(&self, id: &SessionId) -> ServiceResult<()> {
        if !self.store.delete_session(id).await? {
            return Err(not_found(id));
        }

        tracing::info!(session_id = %id, "debate session deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
    ) -> ServiceResult<DebateSession> {
        let current = self.find(id).await?;
        if !current.status.can_transition_to(status) {
            return Err(ServiceError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let completed_at = (status == SessionStatus::Completed).then(Utc::now);
        match self.store.set_status(id, status, completed_at).await? {
            Some(updated) => Ok(updated),
            // lost a race with another transition out of `active`
            None => {
                let latest = self.find(id).await?;
                Err(ServiceError::InvalidTransition {
                    from: latest.status,
                    to: status,
                })
            }
        }
    }

    async fn find(&self, id: &SessionId) -> ServiceResult<DebateSession> {
        self.store
            .session_by_id(id)
            .await?
            .ok_or_else(|| not_found(id))
    }
}

fn not_found(id: &SessionId) -> ServiceError {
    ServiceError::not_found(format!("Debate session '{id}' not found"))
}
