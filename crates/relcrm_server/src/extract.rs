//! Request extraction helpers that report failures as [`ApiError`].

use crate::error::ApiError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::Json;
use relcrm_core::UserId;
use uuid::Uuid;

/// Header carrying the caller identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller, taken from the `X-User-Id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub UserId);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::validation("missing X-User-Id header"))?;
        let text = value
            .to_str()
            .map_err(|_| ApiError::validation("X-User-Id header is not valid text"))?;
        Uuid::parse_str(text.trim())
            .map(CallerId)
            .map_err(|_| ApiError::validation("X-User-Id header must be a UUID"))
    }
}

pub fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::validation(format!("invalid id `{raw}`")))
}

pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

pub fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}
