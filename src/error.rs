use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::fetch::FetchError;
use crate::models::ErrorBody;

/// Everything a request can fail with, as seen by the caller.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Invalid or missing MediaFire URL.")]
    InvalidInput,
    #[error("Direct download link not found on the MediaFire page. The page structure might have changed.")]
    LinkNotFound,
    #[error("Failed to retrieve file: Remote server responded with status {status}.")]
    Upstream { status: u16, details: String },
    #[error("Failed to retrieve file: No response received from MediaFire.")]
    Network(String),
    #[error("Failed to retrieve file: Error setting up the request.")]
    RequestSetup(String),
    #[error("An unexpected error occurred while processing your request.")]
    Unexpected(String),
}

impl ResolveError {
    pub fn status(&self) -> StatusCode {
        match self {
            ResolveError::InvalidInput => StatusCode::BAD_REQUEST,
            ResolveError::LinkNotFound => StatusCode::NOT_FOUND,
            ResolveError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ResolveError::Network(_)
            | ResolveError::RequestSetup(_)
            | ResolveError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::InvalidInput => "InvalidInput",
            ResolveError::LinkNotFound => "LinkNotFound",
            ResolveError::Upstream { .. } => "UpstreamError",
            ResolveError::Network(_) => "NetworkError",
            ResolveError::RequestSetup(_) => "RequestSetupError",
            ResolveError::Unexpected(_) => "UnexpectedError",
        }
    }

    pub fn details(&self) -> Option<&str> {
        match self {
            ResolveError::InvalidInput | ResolveError::LinkNotFound => None,
            ResolveError::Upstream { details, .. }
            | ResolveError::Network(details)
            | ResolveError::RequestSetup(details)
            | ResolveError::Unexpected(details) => Some(details),
        }
    }

    pub fn body(&self) -> ErrorBody {
        let details = self.details().map(str::to_string);
        ErrorBody {
            error: self.to_string(),
            kind: details.as_ref().map(|_| self.kind().to_string()),
            details,
        }
    }

    /// Plain-text rendition used by the redirect endpoint.
    pub fn into_plain(self) -> Response {
        let text = match self.details() {
            Some(details) => format!("{} {}", self, details),
            None => self.to_string(),
        };
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response()
    }
}

impl From<FetchError> for ResolveError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Upstream { status } => ResolveError::Upstream {
                status,
                details: e.to_string(),
            },
            FetchError::Network(_) | FetchError::Timeout(_) => ResolveError::Network(e.to_string()),
            FetchError::Setup(_) => ResolveError::RequestSetup(e.to_string()),
        }
    }
}

impl IntoResponse for ResolveError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
