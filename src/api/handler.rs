use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::api::middleware::extract::{ApiJson, ApiPath, ApiQuery, UserIdent};
use crate::api::server::{ApiResponse, AppState, JsonResult, RouteError};
use crate::db::models::analysis::{DebateAnalysisData, StoredAnalysis};
use crate::db::models::session::{
    DebateMessage, DebateSession, DebateSessionSummary, NewMessage, NewSession, SessionDetail,
    SessionId, SessionStatus,
};
use crate::db::models::stats::{FreudScore, UserDebateStats};
use crate::db::models::{PaginatedResponse, Pagination};
use crate::services::ServiceError;
use crate::services::payment::Registrant;
use crate::services::relay::TurnReply;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> JsonResult<Health> {
    Ok(ApiResponse::ok(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

#[instrument(skip(state, body))]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    user: UserIdent,
    ApiJson(body): ApiJson<NewSession>,
) -> JsonResult<DebateSession> {
    let session = state.sessions.create_session(user.as_deref(), body).await?;
    Ok(ApiResponse::ok(session))
}

#[instrument(skip(state))]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    user: UserIdent,
    ApiQuery(page): ApiQuery<Pagination>,
) -> JsonResult<PaginatedResponse<DebateSessionSummary>> {
    let history = state.sessions.get_history(user.as_deref(), page).await?;
    Ok(ApiResponse::ok(history))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[instrument(skip(state))]
pub async fn search_sessions(
    State(state): State<Arc<AppState>>,
    user: UserIdent,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> JsonResult<PaginatedResponse<DebateSessionSummary>> {
    let defaults = Pagination::default();
    let page = Pagination {
        page: params.page.unwrap_or(defaults.page),
        limit: params.limit.unwrap_or(defaults.limit),
    };

    let found = state
        .sessions
        .search_sessions(&params.q, user.as_deref(), page)
        .await?;
    Ok(ApiResponse::ok(found))
}

#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> JsonResult<SessionDetail> {
    let detail = state.sessions.get_session(&SessionId(id)).await?;
    Ok(ApiResponse::ok(detail))
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: SessionId,
}

/// Deletes the session and its messages, then drops any cached analysis for it.
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> JsonResult<Deleted> {
    let id = SessionId(id);
    state.sessions.delete_session(&id).await?;

    if let Err(e) = state.analysis.remove(&id).await {
        tracing::warn!(session_id = %id, error = ?e, "unable to drop cached analysis");
    }

    Ok(ApiResponse::ok(Deleted { id }))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: SessionStatus,
}

#[instrument(skip(state))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<StatusUpdate>,
) -> JsonResult<DebateSession> {
    let session = state
        .sessions
        .update_status(&SessionId(id), body.status)
        .await?;
    Ok(ApiResponse::ok(session))
}

#[instrument(skip(state))]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> JsonResult<Vec<DebateMessage>> {
    let messages = state.sessions.get_messages(&SessionId(id)).await?;
    Ok(ApiResponse::ok(messages))
}

#[instrument(skip(state, body))]
pub async fn add_message(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(mut body): ApiJson<NewMessage>,
) -> JsonResult<DebateMessage> {
    body.session_id = SessionId(id);
    let message = state.sessions.add_message(body).await?;
    Ok(ApiResponse::ok(message))
}

#[instrument(skip(state, body))]
pub async fn store_analysis(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<DebateAnalysisData>,
) -> JsonResult<StoredAnalysis> {
    let stored = state.analysis.store(&SessionId(id), body).await?;
    Ok(ApiResponse::ok(stored))
}

#[instrument(skip(state))]
pub async fn get_analysis(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<Uuid>,
) -> JsonResult<DebateAnalysisData> {
    let analysis = state.analysis.get(&SessionId(id)).await?;
    Ok(ApiResponse::ok(analysis))
}

#[instrument(skip(state))]
pub async fn list_analyses(
    State(state): State<Arc<AppState>>,
    user: UserIdent,
) -> JsonResult<Vec<StoredAnalysis>> {
    let all = state.analysis.list_all(user.as_deref()).await?;
    Ok(ApiResponse::ok(all))
}

#[instrument(skip(state))]
pub async fn user_stats(
    State(state): State<Arc<AppState>>,
    user: UserIdent,
) -> JsonResult<UserDebateStats> {
    let stats = state.stats.get_user_stats(user.as_deref()).await?;
    Ok(ApiResponse::ok(stats))
}

#[instrument(skip(state))]
pub async fn freud_score(
    State(state): State<Arc<AppState>>,
    user: UserIdent,
) -> JsonResult<FreudScore> {
    let score = state.stats.get_freud_score(user.as_deref()).await?;
    Ok(ApiResponse::ok(score))
}

#[derive(Debug, Deserialize)]
pub struct TurnBody {
    pub message: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub context: Value,
}

/// Relays the utterance to the AI webhook. Webhook failures still answer 200 with the fallback
/// reply and its `error` field set.
#[instrument(skip(state, body))]
pub async fn debate_turn(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<TurnBody>,
) -> JsonResult<TurnReply> {
    if body.message.trim().is_empty() {
        return Err(ServiceError::validation("Message is required").into());
    }

    let reply = state
        .relay
        .send_turn(&body.message, &body.topic, &body.context)
        .await;
    Ok(ApiResponse::ok(reply))
}

/// Event ids arrive as strings or bare numbers depending on the client.
fn event_id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBody {
    #[serde(default)]
    pub event_id: Option<Value>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub registration_data: Option<Registrant>,
}

#[derive(Debug, Serialize)]
pub struct OrderCreated {
    pub success: bool,
    pub id: String,
    pub currency: String,
    pub amount: u64,
    pub receipt: String,
}

#[instrument(skip(state, body))]
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<OrderBody>,
) -> Result<Json<OrderCreated>, RouteError> {
    let event_id = event_id_text(body.event_id.as_ref());
    let order = state
        .payments
        .create_order(
            event_id.as_deref(),
            body.amount,
            body.registration_data.as_ref(),
        )
        .await?;

    Ok(Json(OrderCreated {
        success: true,
        id: order.id,
        currency: order.currency,
        amount: order.amount,
        receipt: order.receipt,
    }))
}

/// Checkout callback fields keep the gateway's snake_case names.
#[derive(Debug, Deserialize)]
pub struct VerifyBody {
    #[serde(default)]
    pub razorpay_order_id: Option<String>,
    #[serde(default)]
    pub razorpay_payment_id: Option<String>,
    #[serde(default)]
    pub razorpay_signature: Option<String>,
    #[serde(default, rename = "registrationData")]
    pub registration_data: Option<Registrant>,
    #[serde(default, rename = "eventId")]
    pub event_id: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerified {
    pub success: bool,
    pub message: &'static str,
    pub payment_id: String,
    pub registration_id: String,
}

#[instrument(skip(state, body))]
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<VerifyBody>,
) -> Result<Json<PaymentVerified>, RouteError> {
    let event_id = event_id_text(body.event_id.as_ref());
    let verified = state
        .payments
        .verify_payment(
            body.razorpay_order_id.as_deref(),
            body.razorpay_payment_id.as_deref(),
            body.razorpay_signature.as_deref(),
            body.registration_data.as_ref(),
            event_id.as_deref(),
        )
        .await?;

    Ok(Json(PaymentVerified {
        success: true,
        message: "Payment verified successfully",
        payment_id: verified.payment_id,
        registration_id: verified.registration_id,
    }))
}
