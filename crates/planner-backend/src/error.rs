//! Unified error handling for the planner API.
//!
//! Handlers return [`ApiResult`] and use `?` freely; every variant maps to a
//! status code and a JSON `{error, details?}` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::providers::ProviderError;
use crate::sync::SyncError;
use crate::tokens::TokenError;

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Unified error type for API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Store, pool or other internal failure
    #[error("{0}")]
    Internal(#[from] anyhow::Error),

    /// A service reported that a mutation did not go through
    #[error("{0}")]
    Failed(String),

    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Server is missing configuration for the requested feature
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication required but not provided or invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not permitted to access resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A provider answered with an error status that is relayed as-is
    #[error("Upstream error ({status}): {message}")]
    Upstream { status: StatusCode, message: String },
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        ApiError::NotFound(resource.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ApiError::Failed(message.into())
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConfigured(provider) => {
                ApiError::Config(format!("{} integration is not configured", provider))
            }
            ProviderError::Status { status, body } => ApiError::Upstream {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                message: upstream_message(&body),
            },
            ProviderError::Unauthorized => ApiError::Upstream {
                status: StatusCode::UNAUTHORIZED,
                message: "Provider rejected the token".to_string(),
            },
            other => ApiError::Upstream {
                status: StatusCode::BAD_GATEWAY,
                message: other.to_string(),
            },
        }
    }
}

/// OAuth error bodies carry `error_description` and `error`; anything else
/// is relayed verbatim.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error_description")
                .or_else(|| json.get("error"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::UnknownState => {
                ApiError::BadRequest("Unknown or expired link request".to_string())
            }
            TokenError::Verification { provider, .. } => ApiError::BadRequest(format!(
                "Could not verify the {} account",
                provider.display_name()
            )),
            TokenError::Provider(e) => e.into(),
            TokenError::Store(e) => ApiError::Internal(e),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Provider(e) => e.into(),
            SyncError::Token(e) => e.into(),
            SyncError::Store(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(e.to_string()),
                )
            }
            ApiError::Failed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), None),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                format!("{} not found", resource),
                None,
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server configuration error".to_string(),
                    Some(msg.clone()),
                )
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), None),
            ApiError::Upstream { status, message } => {
                tracing::warn!("Upstream error {}: {}", status, message);
                (*status, message.clone(), None)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_error_body_is_unwrapped() {
        let err: ApiError = ProviderError::Status {
            status: 400,
            body: r#"{"error":"invalid_grant","error_description":"Token has been revoked"}"#
                .to_string(),
        }
        .into();
        match err {
            ApiError::Upstream { status, message } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(message, "Token has been revoked");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_plain_error_body_is_relayed() {
        assert_eq!(upstream_message("boom"), "boom");
        assert_eq!(upstream_message(r#"{"error":"invalid_client"}"#), "invalid_client");
    }

    #[test]
    fn test_unknown_state_is_bad_request() {
        let response = ApiError::from(TokenError::UnknownState).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
