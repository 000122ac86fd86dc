//! JSON error responses.
//!
//! # Invariants
//! - Every failure leaves the server as `{code, message}` with a status
//!   derived from the code.
//! - Internal and decryption failures never echo their cause. The cause is
//!   logged next to a fresh correlation id that is returned instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};
use relcrm_core::{ClientServiceError, ErrorCode, MergeError, RepoError};
use serde::Serialize;
use std::fmt::Display;
use uuid::Uuid;

const INTERNAL_MESSAGE: &str = "internal error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug)]
pub struct ApiError {
    body: ErrorBody,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            body: ErrorBody {
                code,
                message: message.into(),
                correlation_id: None,
            },
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn internal(cause: impl Display) -> Self {
        Self::from_code(ErrorCode::Internal, cause)
    }

    /// Builds the response for `code`, hiding `cause` when the code is
    /// internal.
    pub fn from_code(code: ErrorCode, cause: impl Display) -> Self {
        if !code.is_internal() {
            return Self::new(code, cause.to_string());
        }
        let correlation_id = Uuid::new_v4();
        error!(
            "event=api_error module=server status=error code={} correlation_id={} cause={}",
            code, correlation_id, cause
        );
        Self {
            body: ErrorBody {
                code,
                message: INTERNAL_MESSAGE.to_string(),
                correlation_id: Some(correlation_id),
            },
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.body.code
    }

    pub fn status(&self) -> StatusCode {
        status_for(self.body.code)
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation | ErrorCode::InvalidMerge => StatusCode::BAD_REQUEST,
        ErrorCode::Ownership => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::ConcurrentModification => StatusCode::CONFLICT,
        ErrorCode::Decryption | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        Self::from_code(err.code(), err)
    }
}

impl From<ClientServiceError> for ApiError {
    fn from(err: ClientServiceError) -> Self {
        Self::from_code(err.code(), err)
    }
}

impl From<MergeError> for ApiError {
    fn from(err: MergeError) -> Self {
        Self::from_code(err.code(), err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::CONFLICT {
            warn!(
                "event=api_error module=server status=conflict code={}",
                self.body.code
            );
        }
        (status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::{status_for, ApiError};
    use axum::http::StatusCode;
    use relcrm_core::ErrorCode;

    #[test]
    fn codes_map_to_http_statuses() {
        assert_eq!(status_for(ErrorCode::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::InvalidMerge), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCode::Ownership), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorCode::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorCode::ConcurrentModification),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(ErrorCode::Decryption),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_hide_their_cause() {
        let err = ApiError::internal("disk I/O error at /var/lib/relcrm");
        assert_eq!(err.body.message, "internal error");
        assert!(err.body.correlation_id.is_some());

        let err = ApiError::from_code(ErrorCode::NotFound, "client not found");
        assert_eq!(err.body.message, "client not found");
        assert!(err.body.correlation_id.is_none());
    }
}
