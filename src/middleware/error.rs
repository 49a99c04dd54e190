use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::types::ErrorBody;
use crate::store::StoreError;

/// Authentication errors for the middleware layer.
///
/// Nothing from the IdP or the store reaches the client. API callers get a
/// generic JSON body. The callback route turns login-flow failures into a
/// redirect to the frontend instead (see [`is_login_failure`](Self::is_login_failure)).
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No usable session (missing cookie, unknown session, failed refresh).
    #[error("Unauthorized")]
    Unauthenticated,

    /// Callback `state` did not match the pending authorization.
    #[error("OAuth state mismatch")]
    CsrfStateMismatch,

    /// The IdP rejected the authorization code or the resulting tokens.
    #[error("Code exchange failed: {0}")]
    CodeExchangeFailure(String),

    /// Token store operation failed.
    #[error("Session store error: {0}")]
    Store(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// `true` for failures of the interactive login flow. The callback
    /// redirects home on these and reports anything else as an error.
    #[must_use]
    pub fn is_login_failure(&self) -> bool {
        matches!(self, Self::CsrfStateMismatch | Self::CodeExchangeFailure(_))
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody::new(StatusCode::UNAUTHORIZED, "Unauthorized")),
            )
                .into_response(),
            Self::CsrfStateMismatch | Self::CodeExchangeFailure(_) => {
                tracing::warn!(error = %self, "Login failed");
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorBody::new(StatusCode::BAD_REQUEST, "Login failed")),
                )
                    .into_response()
            }
            Self::Store(_) | Self::Config(_) => {
                tracing::error!(error = %self, "Auth internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal error",
                    )),
                )
                    .into_response()
            }
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<crate::error::Error> for AuthError {
    fn from(e: crate::error::Error) -> Self {
        Self::CodeExchangeFailure(e.to_string())
    }
}
