//! Service-wide error taxonomy and HTTP mapping
//!
//! Endpoint-facing failures are expressed as [`ApiError`] and rendered as
//! `{"error": {"code", "message"}}` without internal diagnostics. Chain
//! source failures never reach this type: they are absorbed inside the
//! sources as "no data this cycle". Webhook failures are recorded on the
//! intent, not surfaced to merchants synchronously.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::models::Network;
use crate::store::StoreError;

/// Stable machine-readable error codes for API consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    ValidationFailed,
    NetworkNotConfigured,
    AmountSpaceExhausted,
    Conflict,
    InternalError,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Invalid or inactive merchant/API key. Never says which part failed.
    #[error("invalid merchant or API key")]
    Unauthorized,

    /// Unknown intent, or an intent read with the wrong key. The two cases
    /// are indistinguishable to avoid an enumeration oracle.
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    /// No payment address configured for the requested network.
    #[error("no payment address configured for network {0}")]
    NetworkNotConfigured(Network),

    /// Amount disambiguation ran out of retries. Transient: the caller may
    /// retry the whole create call.
    #[error("could not allocate a unique payment amount for the network")]
    AmountSpaceExhausted,

    #[error("conflicting request")]
    Conflict,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::NetworkNotConfigured(_) => StatusCode::BAD_REQUEST,
            ApiError::AmountSpaceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            ApiError::Unauthorized => ErrorCode::Unauthorized,
            ApiError::NotFound => ErrorCode::NotFound,
            ApiError::Validation(_) => ErrorCode::ValidationFailed,
            ApiError::NetworkNotConfigured(_) => ErrorCode::NetworkNotConfigured,
            ApiError::AmountSpaceExhausted => ErrorCode::AmountSpaceExhausted,
            ApiError::Conflict => ErrorCode::Conflict,
            ApiError::Store(_) | ApiError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Message safe to show to API consumers. Storage and internal errors
    /// are collapsed to a generic line; details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Store(_) | ApiError::Internal(_) => {
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::AmountSpaceExhausted | ApiError::Store(_))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.user_message(),
                retry_after: self.is_retryable().then_some(10),
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::NetworkNotConfigured(Network::Trc20).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::AmountSpaceExhausted.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_internal_errors_do_not_leak() {
        let err = ApiError::Internal("pool timed out talking to pg".to_string());
        assert_eq!(err.user_message(), "an internal error occurred");
        assert_eq!(err.error_code(), ErrorCode::InternalError);
    }

    #[test]
    fn test_transient_failures_are_retryable() {
        assert!(ApiError::AmountSpaceExhausted.is_retryable());
        assert!(!ApiError::Unauthorized.is_retryable());
    }
}
