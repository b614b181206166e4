//! Failure taxonomy for profile sources and its HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const THROTTLED_DETAIL: &str = "Rate limit hit - try again later";
pub const CONNECTION_DETAIL: &str =
    "Connection error - Instagram refused the request, try again later or use a proxy";

/// Why a profile could not be served by the web source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    NotFound,
    Private,
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Upstream answered 429, or the local limiter would have waited too long
    #[error("rate limited")]
    Throttled { retry_after: Option<Duration> },

    #[error("profile @{username} unavailable: {reason:?}")]
    ProfileUnavailable {
        username: String,
        reason: Unavailable,
    },

    /// Connection refused, dropped, or bounced to a login wall
    #[error("connection error: {0}")]
    Connection(String),

    #[error("login required: {0}")]
    LoginRequired(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("username must not be empty")]
    EmptyUsername,

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Error envelope returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl ScrapeError {
    pub fn not_found(username: impl Into<String>) -> Self {
        Self::ProfileUnavailable {
            username: username.into(),
            reason: Unavailable::NotFound,
        }
    }

    pub fn private(username: impl Into<String>) -> Self {
        Self::ProfileUnavailable {
            username: username.into(),
            reason: Unavailable::Private,
        }
    }

    pub fn decode(message: impl std::fmt::Display) -> Self {
        Self::Decode(message.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ScrapeError::Throttled { .. } | ScrapeError::Connection(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ScrapeError::ProfileUnavailable { .. } => StatusCode::NOT_FOUND,
            ScrapeError::EmptyUsername => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text placed in the `detail` field of the error envelope.
    ///
    /// Unclassified failures expose their own message verbatim.
    pub fn detail(&self) -> String {
        match self {
            ScrapeError::Throttled { .. } => THROTTLED_DETAIL.to_string(),
            ScrapeError::Connection(_) => CONNECTION_DETAIL.to_string(),
            ScrapeError::ProfileUnavailable {
                username,
                reason: Unavailable::NotFound,
            } => format!("Profile @{username} does not exist"),
            ScrapeError::ProfileUnavailable {
                username,
                reason: Unavailable::Private,
            } => format!("Profile @{username} is private"),
            other => other.to_string(),
        }
    }

    /// Failures that say something about the egress rather than the target
    pub fn is_egress_failure(&self) -> bool {
        matches!(
            self,
            ScrapeError::Throttled { .. } | ScrapeError::Connection(_) | ScrapeError::Transport(_)
        )
    }
}

impl IntoResponse for ScrapeError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.detail(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
