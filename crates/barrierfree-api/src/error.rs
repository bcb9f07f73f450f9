//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  /// The caller could not be authenticated.
  #[error("unauthorized: {0}")]
  Unauthorized(String),

  /// The caller is known but the request does not fit their state.
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("cache error: {0}")]
  Cache(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<barrierfree_core::Error> for ApiError {
  fn from(e: barrierfree_core::Error) -> Self {
    use barrierfree_core::Error as Core;
    match e {
      Core::Store(inner) => ApiError::Store(inner),
      Core::Cache(inner) => ApiError::Cache(inner),
      Core::NoActiveChallenge => ApiError::BadRequest(e.to_string()),
      e if e.is_authentication() => ApiError::Unauthorized(e.to_string()),
      e => ApiError::BadRequest(e.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Store(e) | ApiError::Cache(e) => {
        tracing::error!(error = %e, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
