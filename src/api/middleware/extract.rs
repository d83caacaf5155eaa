use std::convert::Infallible;

use axum::extract::{FromRequest, FromRequestParts};
use http::request::Parts;

use crate::api::server::RouteError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity as forwarded by the auth proxy. Absence is left for the services to reject.
#[derive(Debug, Clone, Default)]
pub struct UserIdent(pub Option<String>);

impl UserIdent {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S> FromRequestParts<S> for UserIdent
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from);

        Ok(Self(user))
    }
}

/// `axum::Json` whose rejections use the API error envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(RouteError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(RouteError))]
pub struct ApiPath<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(RouteError))]
pub struct ApiQuery<T>(pub T);
