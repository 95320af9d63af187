//! API error taxonomy and the JSON response envelope.
//!
//! Every response carries `{code, success, data}` on success or
//! `{code, success: false, error}` on failure, with the HTTP status matching
//! `code`.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::Serialize,
    serde_json::json,
    tracing::{error, warn},
};

use crate::registry::SessionError;

pub type ApiResult<T = Response> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or missing request fields.
    #[error("{0}")]
    Validation(String),

    /// Unknown or missing token.
    #[error("Unauthorized")]
    Unauthorized,

    /// Wrong session state for the requested operation.
    #[error("{0}")]
    Conflict(String),

    /// A messaging client operation failed.
    #[error("{0}")]
    Upstream(String),

    /// Store read or write failed.
    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) | Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Persistence(e)
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::AlreadyConnected
            | SessionError::NoSession
            | SessionError::NotConnected
            | SessionError::NotLoggedIn => Self::Conflict(e.to_string()),
            SessionError::ConnectTimeout | SessionError::ConnectFailed(_) => {
                Self::Upstream("failed to connect".into())
            },
            SessionError::Client(inner) => Self::Upstream(inner.to_string()),
        }
    }
}

impl From<wabridge_messaging::Error> for ApiError {
    fn from(e: wabridge_messaging::Error) -> Self {
        match e {
            wabridge_messaging::Error::InvalidInput { message } => Self::Validation(message),
            wabridge_messaging::Error::NotConnected => Self::Conflict("not connected".into()),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Persistence(e) => error!(error = %e, "request failed on store access"),
            Self::Upstream(message) => warn!(error = %message, "messaging client call failed"),
            _ => {},
        }
        let body = json!({
            "code": status.as_u16(),
            "success": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Wrap `data` in a 200 success envelope.
pub fn respond<T: Serialize>(data: T) -> Response {
    let body = json!({
        "code": StatusCode::OK.as_u16(),
        "success": true,
        "data": data,
    });
    (StatusCode::OK, Json(body)).into_response()
}
