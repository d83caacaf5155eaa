pub mod extract;

use http::header::{CONTENT_TYPE, HeaderName};
use http::request::Parts as ReqParts;
use http::{HeaderValue, Method};
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::util::env::{EnvErr, Var};
use crate::var;

pub type MiddlewareResult<T> = core::result::Result<T, MiddlewareErr>;

#[derive(Debug, Error)]
pub enum MiddlewareErr {
    #[error(transparent)]
    EnvErr(#[from] EnvErr),
}

/// `CORS_ALLOW_ORIGINS` is either `*` or a comma-separated list of allowed origin suffixes.
pub async fn cors() -> MiddlewareResult<CorsLayer> {
    let cors_allowed = var!(Var::CorsAllowOrigins).await?;
    Ok(cors_layer(cors_allowed))
}

pub fn cors_layer(cors_allowed: &'static str) -> CorsLayer {
    let allowed = if cors_allowed.trim() == "*" {
        AllowOrigin::any()
    } else {
        AllowOrigin::predicate(|org: &HeaderValue, _: &ReqParts| {
            cors_allowed
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .any(|o| org.as_bytes().ends_with(o.as_bytes()))
        })
    };

    CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(extract::USER_ID_HEADER)])
        .allow_origin(allowed)
}
