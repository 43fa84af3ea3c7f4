//! Error types for the mirror

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use http::uri::InvalidUri;

use crate::digest::DigestError;
use crate::resolver::ResolveError;
use crate::upstream::UpstreamError;

/// Result type for mirror handlers
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Every way a mirror request can fail.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// A registry API error with its own status and code
    #[error("{message}")]
    Api {
        /// Response status
        status: StatusCode,
        /// Registry error code, e.g. `DENIED`
        code: &'static str,
        /// Human readable message
        message: String,
    },

    /// Anything else, rendered as a 500
    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Failures that leave the mirror unable to answer.
#[derive(Debug, thiserror::Error)]
pub enum InternalError {
    /// The upstream URL could not be decided
    #[error("making url: {0}")]
    Routing(#[from] RouteError),

    /// No authenticated client for the upstream
    #[error("creating transport: {0}")]
    Transport(#[from] UpstreamError),

    /// The forwarded request failed
    #[error("fetching {url}: {source}")]
    Proxy {
        /// Upstream URL
        url: Uri,
        /// What went wrong
        source: registry_client::Error,
    },
}

/// Failures while rewriting a request path to an upstream URL.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The requested digest is malformed
    #[error("parsing digest: {0}")]
    Digest(#[from] DigestError),

    /// Membership could not be decided
    #[error("comparing digests: {0}")]
    Membership(#[from] ResolveError),

    /// The rewritten URL is invalid
    #[error("invalid upstream URL: {0}")]
    Url(#[from] InvalidUri),
}

impl From<RouteError> for MirrorError {
    fn from(error: RouteError) -> Self {
        MirrorError::Internal(error.into())
    }
}

impl From<UpstreamError> for MirrorError {
    fn from(error: UpstreamError) -> Self {
        MirrorError::Internal(error.into())
    }
}

impl MirrorError {
    /// The mirror never accepts writes.
    pub fn read_only() -> Self {
        MirrorError::Api {
            status: StatusCode::METHOD_NOT_ALLOWED,
            code: "DENIED",
            message: "read-only".into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            MirrorError::Api { status, .. } => *status,
            MirrorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for registry error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            MirrorError::Api { code, .. } => *code,
            MirrorError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Registry error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for MirrorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        if let MirrorError::Internal(error) = &self {
            tracing::error!(%error, "request failed");
        }

        let body = ErrorResponse {
            errors: vec![ErrorDetail { code, message }],
        };

        (status, axum::Json(body)).into_response()
    }
}
