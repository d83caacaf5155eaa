use thiserror::Error;

use crate::db::PgError;
use crate::db::models::session::SessionStatus;
use crate::db::redis::CacheErr;

pub mod analysis;
pub mod history;
pub mod payment;
pub mod relay;
pub mod stats;

pub type ServiceResult<T> = core::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("cannot move a session from '{from}' to '{to}'")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("{0}")]
    Persistence(#[from] PgError),

    #[error("{0}")]
    Cache(#[from] CacheErr),

    /// Message is safe to show to clients; the underlying detail is logged where it happens.
    #[error("{0}")]
    Gateway(String),

    #[error("Invalid payment signature")]
    SignatureInvalid,

    #[error("Payment not captured (status: {0})")]
    PaymentNotCaptured(String),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

/// Rejects absent or blank user ids before any store access.
pub(crate) fn require_user(user_id: Option<&str>) -> ServiceResult<&str> {
    match user_id.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(ServiceError::validation("User ID is required")),
    }
}
