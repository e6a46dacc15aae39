use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::resources::ApiStatus;
use crate::storage::StoreError;

/// Errors returned by resource endpoints
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{kind} '{uid}' not found")]
    NotFound { kind: &'static str, uid: String },

    #[error("{kind} '{uid}' was modified (submitted version {submitted}, current {current}); re-fetch and retry")]
    Conflict {
        kind: &'static str,
        uid: String,
        submitted: i64,
        current: i64,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Watch expired: {0}")]
    Gone(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Compacted { .. } => ApiError::Gone(e.to_string()),
            other => ApiError::Store(other),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Store(StoreError::from(e))
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiError::Conflict { .. } => ApiStatus::failed(self.to_string()),
            _ => ApiStatus::err(self.to_string()),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
