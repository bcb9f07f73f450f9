//! Entities of the durable store and the snapshots handed to each request.
//!
//! Relationships are never loaded lazily. A [`Player`] is the user row joined
//! with its current challenge and that challenge's elements, fetched in one
//! go and treated as an immutable snapshot for the rest of the request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── User ────────────────────────────────────────────────────────────────────

/// A chat user taking part in the game.
///
/// The id is assigned by the messaging platform and is stable across
/// sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id:                        i64,
  pub created_at:                DateTime<Utc>,
  pub name:                      String,
  pub username:                  Option<String>,
  pub avatar_url:                Option<String>,
  /// Mean of all per-challenge scores, 0–100.
  pub average_score:             f64,
  /// Set on the first completion of the current challenge; drives the
  /// once-per-day cooldown gate.
  pub last_completed_at:         Option<DateTime<Utc>>,
  pub current_challenge_id:      Option<String>,
  /// The most recent challenge prompt sent in chat, deleted when replaced.
  pub last_challenge_message_id: Option<String>,
  pub received_certificate:      bool,
}

/// Profile fields captured on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
  pub id:         i64,
  pub name:       String,
  pub username:   Option<String>,
  pub avatar_url: Option<String>,
}

// ─── Challenge ───────────────────────────────────────────────────────────────

/// The ground-truth placement of one element of a challenge scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeElement {
  pub id:       String,
  pub name:     String,
  /// Render width in scene units.
  pub width:    f64,
  pub target_x: f64,
  pub target_y: f64,
}

/// A single level: a scene the user must furnish correctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
  pub id:           String,
  pub name:         String,
  /// Chat-rendered description (HTML markup allowed).
  pub description:  String,
  pub scene_width:  f64,
  pub scene_height: f64,
  #[serde(default)]
  pub elements:     Vec<ChallengeElement>,
}

/// A user together with their eagerly-loaded current challenge.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
  pub user:              User,
  pub current_challenge: Option<Challenge>,
}

// ─── Mailing ─────────────────────────────────────────────────────────────────

/// A scheduled broadcast delivered once per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mailing {
  pub id:           i64,
  pub send_at:      DateTime<Utc>,
  pub message_text: String,
  pub button_text:  String,
  pub button_url:   String,
}

/// A mailing as provisioned, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMailing {
  pub send_at:      DateTime<Utc>,
  pub message_text: String,
  pub button_text:  String,
  pub button_url:   String,
}

// ─── Submissions ─────────────────────────────────────────────────────────────

/// One element as positioned by the user in the mini-app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
  pub id: String,
  pub x:  f64,
  pub y:  f64,
}
