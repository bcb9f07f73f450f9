//! HTTP API for the Barrier-Free mini-app.
//!
//! Exposes an axum [`Router`] backed by an [`Engine`]. Every `/api` route
//! requires an `X-Init-Data` header; TLS and transport concerns are the
//! caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! axum::serve(listener, barrierfree_api::router(state)).await?;
//! ```

pub mod auth;
pub mod challenges;
pub mod error;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use barrierfree_core::{Engine, cache::RankingCache, store::ProgressStore};
use tower_http::trace::TraceLayer;

pub use auth::AuthConfig;
pub use error::ApiError;

/// Shared state handed to every handler.
pub struct AppState<S, C> {
  pub engine: Engine<S, C>,
  pub auth:   Arc<AuthConfig>,
}

impl<S, C> Clone for AppState<S, C> {
  fn clone(&self) -> Self {
    Self { engine: self.engine.clone(), auth: Arc::clone(&self.auth) }
  }
}

/// Build the full router: the mini-app API plus `/health`.
pub fn router<S, C>(state: AppState<S, C>) -> Router<()>
where
  S: ProgressStore + 'static,
  C: RankingCache + 'static,
{
  Router::new()
    .route("/health", get(health))
    .route("/api/challenges", get(challenges::current))
    .route("/api/challenges/complete", post(challenges::complete::<S, C>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn health() -> &'static str { "ok" }
