//! `X-Init-Data` extractor: authenticates the mini-app caller and loads
//! their player snapshot.

use std::time::Duration;

use axum::{extract::FromRequestParts, http::request::Parts};
use barrierfree_core::{
  Error, cache::RankingCache, init_data, model::Player, store::ProgressStore,
};
use chrono::{DateTime, Utc};

use crate::{AppState, error::ApiError};

/// Header carrying the signed InitData token.
pub const INIT_DATA_HEADER: &str = "x-init-data";

/// How InitData tokens are checked for this server instance.
#[derive(Debug, Clone)]
pub struct AuthConfig {
  /// Shared secret the platform signs tokens with.
  pub bot_token: String,
  /// Oldest accepted `auth_date`, measured back from now. `None` accepts
  /// any age.
  pub max_age:   Option<Duration>,
}

/// Verify `token` and return the id of the user it was issued to.
pub fn verify_token(token: &str, config: &AuthConfig, now: DateTime<Utc>) -> Result<i64, Error> {
  let data = init_data::authenticate(token, &config.bot_token)?;
  if let Some(max_age) = config.max_age {
    data.check_freshness(now, max_age)?;
  }
  data.user.map(|u| u.id).ok_or(Error::MissingUserClaim)
}

/// The authenticated caller with their current challenge loaded.
pub struct CurrentPlayer(pub Player);

impl<S, C> FromRequestParts<AppState<S, C>> for CurrentPlayer
where
  S: ProgressStore + 'static,
  C: RankingCache + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S, C>,
  ) -> Result<Self, Self::Rejection> {
    let token = parts
      .headers
      .get(INIT_DATA_HEADER)
      .and_then(|v| v.to_str().ok())
      .ok_or_else(|| ApiError::Unauthorized("missing X-Init-Data header".into()))?;

    let user_id = verify_token(token, &state.auth, Utc::now()).map_err(|e| {
      tracing::debug!(error = %e, "init data rejected");
      ApiError::from(e)
    })?;

    let player = state
      .engine
      .store
      .load_player(user_id)
      .await
      .map_err(|e| ApiError::Store(Box::new(e)))?
      .ok_or(Error::UnknownUser(user_id))?;

    Ok(CurrentPlayer(player))
  }
}
