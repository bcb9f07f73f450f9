//! Handlers for `/api/challenges` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/api/challenges` | The caller's current challenge, without targets |
//! | `POST` | `/api/challenges/complete` | Body: `{"placed_elements":[{"id":"a","x":0,"y":0}]}` |

use axum::{Json, extract::State};
use barrierfree_core::{
  Error,
  cache::RankingCache,
  model::{Challenge, Placement},
  store::ProgressStore,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{AppState, auth::CurrentPlayer, error::ApiError};

// ─── Current challenge ───────────────────────────────────────────────────────

/// An element as the mini-app sees it: its target stays on the server.
#[derive(Debug, Serialize)]
pub struct ElementView {
  pub id:    String,
  pub name:  String,
  pub width: f64,
}

#[derive(Debug, Serialize)]
pub struct ChallengeView {
  pub id:           String,
  pub name:         String,
  pub scene_width:  f64,
  pub scene_height: f64,
  pub elements:     Vec<ElementView>,
}

impl From<Challenge> for ChallengeView {
  fn from(c: Challenge) -> Self {
    Self {
      id:           c.id,
      name:         c.name,
      scene_width:  c.scene_width,
      scene_height: c.scene_height,
      elements:     c
        .elements
        .into_iter()
        .map(|e| ElementView { id: e.id, name: e.name, width: e.width })
        .collect(),
    }
  }
}

/// `GET /api/challenges`
pub async fn current(CurrentPlayer(player): CurrentPlayer) -> Result<Json<ChallengeView>, ApiError> {
  let challenge = player.current_challenge.ok_or(Error::NoActiveChallenge)?;
  Ok(Json(challenge.into()))
}

// ─── Complete ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
  pub placed_elements: Vec<Placement>,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
  pub ok: bool,
}

/// `POST /api/challenges/complete`
pub async fn complete<S, C>(
  State(state): State<AppState<S, C>>,
  CurrentPlayer(player): CurrentPlayer,
  Json(body): Json<CompleteBody>,
) -> Result<Json<CompleteResponse>, ApiError>
where
  S: ProgressStore + 'static,
  C: RankingCache + 'static,
{
  state
    .engine
    .complete_challenge(&player, &body.placed_elements, Utc::now())
    .await?;
  Ok(Json(CompleteResponse { ok: true }))
}
