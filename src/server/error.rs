//! HTTP error mapping for the query surface.
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::matcher::MatchError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The index has never been built. Distinguished 503, never confusable
    /// with an empty result list.
    #[error("actor index not built")]
    Unavailable,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("file too large: max {0} bytes allowed")]
    PayloadTooLarge(usize),

    #[error("internal server error: {0}")]
    Internal(String),
}

/// API error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unavailable => "index_not_built",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<MatchError> for ApiError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Unavailable => ApiError::Unavailable,
            MatchError::InvalidParameter(msg) => ApiError::BadRequest(msg),
            // Single-image surface: an undecodable upload is the client's problem
            MatchError::Embed(e) => ApiError::BadRequest(format!("image processing failed: {e}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbedderError;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Unavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::PayloadTooLarge(10).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_match_error_mapping() {
        assert!(matches!(
            ApiError::from(MatchError::Unavailable),
            ApiError::Unavailable
        ));
        assert!(matches!(
            ApiError::from(MatchError::InvalidParameter("k".into())),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(MatchError::Embed(EmbedderError::DecodeFailed("bad".into()))),
            ApiError::BadRequest(_)
        ));
    }
}
