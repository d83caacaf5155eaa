use std::net::SocketAddr;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{MatchedPath, Request};
use axum::middleware::{Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware::{self, MiddlewareErr};
use crate::db::prelude::*;
use crate::db::redis::redis_pool;
use crate::services::ServiceError;
use crate::services::analysis::AnalysisCache;
use crate::services::history::SessionService;
use crate::services::payment::PaymentService;
use crate::services::relay::{RelayErr, TurnRelay};
use crate::services::stats::StatsService;
use crate::util::env::{EnvErr, Var};
use crate::util::gateway::{GatewayErr, PaymentGateway, RazorpayClient};
use crate::var;

pub type JsonResult<T> = core::result::Result<Json<ApiResponse<T>>, RouteError>;

/// Success envelope; failures are rendered by `RouteError`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Clone, Debug)]
pub struct AppState {
    pub sessions: SessionService,
    pub stats: StatsService,
    pub analysis: AnalysisCache,
    pub relay: TurnRelay,
    pub payments: PaymentService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DebateStore>,
        kv: Arc<dyn KvStore>,
        relay: TurnRelay,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            sessions: SessionService::new(store.clone()),
            stats: StatsService::new(store.clone()),
            analysis: AnalysisCache::new(kv, store),
            relay,
            payments: PaymentService::new(gateway),
        }
    }

    #[instrument]
    pub async fn from_env() -> Result<Self, RouteError> {
        let store = Arc::new(SessionRepository::new(db_pool().await?.clone()));
        let kv = Arc::new(redis_pool().await?.clone());
        let relay = TurnRelay::from_env().await?;
        let gateway = Arc::new(RazorpayClient::from_env().await?);

        Ok(Self::new(store, kv, relay, gateway))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let session_routes = Router::new()
        .route("/", post(create_session).get(list_sessions))
        .route("/search", get(search_sessions))
        .route("/{id}", get(get_session).delete(delete_session))
        .route("/{id}/status", patch(update_status))
        .route("/{id}/messages", get(list_messages).post(add_message))
        .route("/{id}/analysis", get(get_analysis).put(store_analysis));

    let payment_routes = Router::new()
        .route("/order", post(create_order))
        .route("/verify", post(verify_payment));

    Router::new()
        .route("/health", get(health))
        .nest("/sessions", session_routes)
        .route("/analysis", get(list_analyses))
        //
        // aggregate views
        .route("/stats", get(user_stats))
        .route("/stats/freud", get(freud_score))
        //
        // ai relay
        .route("/debate/turn", post(debate_turn))
        .nest("/payment", payment_routes)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .with_state(state)
}

#[instrument(skip(state, tx))]
async fn serve(state: Arc<AppState>, tx: UnboundedSender<SocketAddr>) -> Result<(), RouteError> {
    let cors = middleware::cors().await?;
    let app = router(state).layer(cors);

    let port_var = var!(Var::ServerApiPort).await?;
    let port = port_var
        .parse::<u16>()
        .map_err(|_| RouteError::InvalidPort(port_var.to_string()))?;

    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    if tx.send(socket_addr).is_err() {
        tracing::warn!("server-ready listener dropped before bind completed");
    }
    axum::serve(listener, app).await?;

    Ok(())
}

/// Logs the `RouteError` a handler stashed in the response extensions.
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        if res.status().is_server_error() {
            tracing::error!(error = ?err, "error occurred inside route handler");
        } else {
            tracing::warn!(error = %err, "request rejected");
        }
    }

    res
}

#[instrument(skip(tx, rx))]
pub async fn start_server(
    tx: UnboundedSender<SocketAddr>,
    mut rx: UnboundedReceiver<SocketAddr>,
) -> Result<Vec<JoinHandle<()>>, RouteError> {
    tracing::info!("starting server");
    let state = Arc::new(AppState::from_env().await?);

    let server_handle = tokio::task::spawn(async move {
        if let Err(e) = serve(state, tx).await {
            tracing::error!(error = ?e, "api server exited");
        }
    });

    let logging_handle = tokio::task::spawn(async move {
        if let Some(addr) = rx.recv().await {
            tracing::info!(
                server_url = &format!("http://127.0.0.1:{}", addr.port()),
                "server ready"
            );
        }
    });

    Ok(vec![server_handle, logging_handle])
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    QueryError(#[from] PgError),

    #[error(transparent)]
    CacheError(#[from] CacheErr),

    #[error(transparent)]
    GatewayError(#[from] GatewayErr),

    #[error(transparent)]
    RelayError(#[from] RelayErr),

    #[error(transparent)]
    EnvError(#[from] EnvErr),

    #[error(transparent)]
    MiddlewareError(#[from] MiddlewareErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    #[error("{}", .0.body_text())]
    InvalidBody(#[from] JsonRejection),

    #[error("{}", .0.body_text())]
    InvalidPath(#[from] PathRejection),

    #[error("{}", .0.body_text())]
    InvalidQuery(#[from] QueryRejection),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            success: bool,
            error: String,
        }

        let (status, error) = match &self {
            RouteError::Service(err) => match err {
                ServiceError::Validation(_)
                | ServiceError::InvalidTransition { .. }
                | ServiceError::SignatureInvalid
                | ServiceError::PaymentNotCaptured(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                // store failures are reported with their message; the gateway's is already generic
                ServiceError::Persistence(_)
                | ServiceError::Cache(_)
                | ServiceError::Gateway(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            },

            RouteError::InvalidBody(_) | RouteError::InvalidPath(_) | RouteError::InvalidQuery(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }

            RouteError::QueryError(_)
            | RouteError::CacheError(_)
            | RouteError::GatewayError(_)
            | RouteError::RelayError(_)
            | RouteError::EnvError(_)
            | RouteError::MiddlewareError(_)
            | RouteError::Io(_)
            | RouteError::InvalidPort(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("internal server error"),
            ),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                success: false,
                error,
            }),
        )
            .into_response();
        response.extensions_mut().insert(Arc::new(self));

        response
    }
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::db::redis::memory::MemoryKv;
    use crate::db::repositories::memory::MemoryStore;
    use crate::services::payment::test::{SECRET, StubGateway};
    use crate::services::payment::{CAPTURED, sign};
    use crate::services::relay::{FALLBACK_REPLY, RetryPolicy};

    struct Harness {
        app: Router,
        store: Arc<MemoryStore>,
        _webhook: MockServer,
    }

    async fn harness_with(reply_status: u16, payment_status: &str) -> Harness {
        let webhook = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(reply_status)
                    .set_body_json(json!({ "reply": "A measured rebuttal." })),
            )
            .mount(&webhook)
            .await;

        let relay = TurnRelay::new(
            &webhook.uri(),
            RetryPolicy {
                max_retries: 3,
                base_delay: std::time::Duration::from_millis(1),
            },
        )
        .unwrap();

        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(
            store.clone(),
            Arc::new(MemoryKv::new()),
            relay,
            Arc::new(StubGateway::new(payment_status)),
        );

        Harness {
            app: router(Arc::new(state)),
            store,
            _webhook: webhook,
        }
    }

    async fn harness() -> Harness {
        harness_with(200, CAPTURED).await
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header("x-user-id", user);
        }

        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        (status, json)
    }

    fn ai_safety() -> Value {
        json!({
            "topic": "AI Safety",
            "user_position": "for",
            "first_speaker": "user",
            "difficulty": "medium"
        })
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness().await;
        let (status, body) = call(&h.app, "GET", "/health", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_session_flow_over_http() {
        let h = harness().await;

        let (status, created) =
            call(&h.app, "POST", "/sessions", Some("user-1"), Some(ai_safety())).await;
        assert_eq!(status, StatusCode::OK);
        let id = created["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(created["data"]["status"], "active");

        for turn in 1..=3 {
            let (status, _) = call(
                &h.app,
                "POST",
                &format!("/sessions/{id}/messages"),
                None,
                Some(json!({
                    "speaker": if turn % 2 == 0 { "ai" } else { "user" },
                    "message_text": format!("turn {turn}"),
                    "turn_number": turn
                })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, detail) = call(&h.app, "GET", &format!("/sessions/{id}"), None, None).await;
        assert_eq!(detail["data"]["session"]["total_turns"], 3);
        assert_eq!(detail["data"]["messages"].as_array().unwrap().len(), 3);

        let (_, history) =
            call(&h.app, "GET", "/sessions?page=1&limit=10", Some("user-1"), None).await;
        assert_eq!(history["data"]["pagination"]["total"], 1);
        assert_eq!(history["data"]["pagination"]["hasMore"], false);
        assert_eq!(history["data"]["items"][0]["message_count"], 3);
        assert_eq!(history["data"]["items"][0]["display_status"], "In Progress");

        let (_, found) =
            call(&h.app, "GET", "/sessions/search?q=safety", Some("user-1"), None).await;
        assert_eq!(found["data"]["items"].as_array().unwrap().len(), 1);

        let (_, none) =
            call(&h.app, "GET", "/sessions/search?q=xyz123", Some("user-1"), None).await;
        assert_eq!(none["data"]["pagination"]["total"], 0);

        let (status, _) = call(&h.app, "DELETE", &format!("/sessions/{id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&h.app, "GET", &format!("/sessions/{id}"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_missing_user_and_bad_input_are_400() {
        let h = harness().await;

        let (status, body) = call(&h.app, "POST", "/sessions", None, Some(ai_safety())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "User ID is required");

        let (status, body) = call(&h.app, "GET", "/stats", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) = call(
            &h.app,
            "POST",
            "/sessions",
            Some("user-1"),
            Some(json!({ "topic": "No position" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = call(&h.app, "GET", "/sessions/not-a-uuid", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_transition_over_http() {
        let h = harness().await;
        let (_, created) =
            call(&h.app, "POST", "/sessions", Some("user-1"), Some(ai_safety())).await;
        let id = created["data"]["id"].as_str().unwrap().to_string();
        let uri = format!("/sessions/{id}/status");

        let (status, body) =
            call(&h.app, "PATCH", &uri, None, Some(json!({ "status": "abandoned" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "abandoned");

        let (status, _) =
            call(&h.app, "PATCH", &uri, None, Some(json!({ "status": "completed" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, stats) = call(&h.app, "GET", "/stats", Some("user-1"), None).await;
        assert_eq!(stats["data"]["abandoned_debates"], 1);

        let (status, freud) = call(&h.app, "GET", "/stats/freud", Some("user-1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(freud["data"]["id"].as_u64().unwrap() <= 100);
    }

    #[tokio::test]
    async fn test_out_of_range_page_is_an_empty_page() {
        let h = harness().await;
        call(&h.app, "POST", "/sessions", Some("user-1"), Some(ai_safety())).await;

        let (status, body) = call(
            &h.app,
            "GET",
            "/sessions?page=9223372036854775807&limit=100",
            Some("user-1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["items"].as_array().unwrap().is_empty());
        assert_eq!(body["data"]["pagination"]["total"], 1);
        assert_eq!(body["data"]["pagination"]["hasMore"], false);

        let (status, _) = call(
            &h.app,
            "GET",
            "/sessions/search?q=safety&page=9223372036854775807",
            Some("user-1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_store_failure_message_is_reported() {
        let h = harness().await;
        h.store.fail_reads(true);

        let (status, body) = call(&h.app, "GET", "/stats", Some("user-1"), None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(
            body["error"].as_str().unwrap().contains("pool timed out"),
            "{body}"
        );
    }

    #[tokio::test]
    async fn test_analysis_routes() {
        let h = harness().await;
        let (_, created) =
            call(&h.app, "POST", "/sessions", Some("user-1"), Some(ai_safety())).await;
        let id = created["data"]["id"].as_str().unwrap().to_string();
        let uri = format!("/sessions/{id}/analysis");

        let (status, _) = call(&h.app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let report = serde_json::to_value(crate::db::models::analysis::sample_analysis(88.0))
            .unwrap();
        let (status, stored) = call(&h.app, "PUT", &uri, None, Some(report)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored["data"]["sessionId"], id.as_str());

        let (_, fetched) = call(&h.app, "GET", &uri, None, None).await;
        assert_eq!(fetched["data"]["overallScore"], 88.0);

        let (_, listed) = call(&h.app, "GET", "/analysis", Some("user-1"), None).await;
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);

        let (_, listed) = call(&h.app, "GET", "/analysis", Some("user-2"), None).await;
        assert!(listed["data"].as_array().unwrap().is_empty());

        let (status, _) = call(&h.app, "GET", "/analysis", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, session) = call(&h.app, "GET", &format!("/sessions/{id}"), None, None).await;
        assert_eq!(session["data"]["session"]["status"], "completed");

        call(&h.app, "DELETE", &format!("/sessions/{id}"), None, None).await;
        let (_, listed) = call(&h.app, "GET", "/analysis", Some("user-1"), None).await;
        assert!(listed["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_debate_turn_relays_and_falls_back() {
        let h = harness().await;
        let body = json!({ "message": "Regulate frontier models.", "topic": "AI Safety" });

        let (status, reply) = call(&h.app, "POST", "/debate/turn", None, Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["data"]["reply"], "A measured rebuttal.");
        assert!(reply["data"].get("error").is_none());

        let failing = harness_with(500, CAPTURED).await;
        let (status, reply) = call(&failing.app, "POST", "/debate/turn", None, Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["data"]["reply"], FALLBACK_REPLY);
        assert_eq!(reply["data"]["model"], "fallback-response");
        assert!(reply["data"]["error"].is_string());

        let (status, _) = call(
            &h.app,
            "POST",
            "/debate/turn",
            None,
            Some(json!({ "message": "  ", "topic": "AI Safety" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_payment_routes_use_flat_shapes() {
        let h = harness().await;

        let (status, order) = call(
            &h.app,
            "POST",
            "/payment/order",
            None,
            Some(json!({
                "eventId": 42,
                "amount": 50000,
                "registrationData": { "name": "Asha", "email": "asha@example.com" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(order["success"], true);
        assert_eq!(order["currency"], "INR");
        assert!(order["receipt"].as_str().unwrap().starts_with("event_42_"));

        let (status, body) = call(
            &h.app,
            "POST",
            "/payment/order",
            None,
            Some(json!({ "eventId": "42" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "success": false, "error": "Missing required fields" }));

        let verify = |signature: String| {
            json!({
                "razorpay_order_id": "order_1",
                "razorpay_payment_id": "pay_1",
                "razorpay_signature": signature,
                "registrationData": { "email": "asha@example.com" },
                "eventId": "42"
            })
        };

        let (status, body) = call(
            &h.app,
            "POST",
            "/payment/verify",
            None,
            Some(verify(sign("not-the-secret", "order_1", "pay_1"))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid payment signature");

        let (status, body) = call(
            &h.app,
            "POST",
            "/payment/verify",
            None,
            Some(verify(sign(SECRET, "order_1", "pay_1"))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["paymentId"], "pay_1");
        assert!(body["registrationId"].as_str().unwrap().starts_with("REG_42_"));

        let pending = harness_with(200, "authorized").await;
        let (status, body) = call(
            &pending.app,
            "POST",
            "/payment/verify",
            None,
            Some(verify(sign(SECRET, "order_1", "pay_1"))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
