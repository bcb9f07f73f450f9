//! The `ProgressStore` trait: the durable side of the game state.
//!
//! Implemented by storage backends (e.g. `barrierfree-store-sqlite`). It holds
//! identity and progression; per-challenge scores live in the ranking cache.
//!
//! Every method that changes progression is a single atomic write whose
//! effect is computed inside the store (compare-and-swap on
//! `current_challenge_id`, `COALESCE` on `last_completed_at`), so a completion
//! request and the daily job can interleave without losing either update.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::model::{Challenge, Mailing, NewMailing, NewUser, Player, User};

// ─── Write payloads ──────────────────────────────────────────────────────────

/// The durable half of a scored submission, applied in one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionUpdate {
  pub user_id:          i64,
  /// The challenge the submission was scored against.
  pub challenge_id:     String,
  pub average_score:    f64,
  /// Cache revision `average_score` was computed at. The stored average is
  /// only replaced by one with a higher revision, so a slow request cannot
  /// put back an older value.
  pub average_revision: i64,
  /// Stamp `last_completed_at` with this instant, but only if the user is
  /// still on `challenge_id` and has no stamp yet.
  pub completed_at:     Option<DateTime<Utc>>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

pub trait ProgressStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Users ─────────────────────────────────────────────────────────────

  /// Return the user with `new.id`, inserting it first if absent.
  ///
  /// Backed by the primary-key constraint, so concurrent first contacts
  /// yield one row.
  fn get_or_create_user(
    &self,
    new: NewUser,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  fn get_user(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  /// Load a user joined with the current challenge and its elements.
  fn load_player(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<Player>, Self::Error>> + Send + '_;

  fn list_users(&self) -> impl Future<Output = Result<Vec<User>, Self::Error>> + Send + '_;

  // ── Progression writes ────────────────────────────────────────────────

  /// Persist the durable part of a completion. See [`CompletionUpdate`].
  fn record_completion(
    &self,
    update: CompletionUpdate,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Move a user from `expected` to `next` and clear `last_completed_at`.
  ///
  /// Returns `false` without writing if the user's current challenge is no
  /// longer `expected`.
  fn switch_challenge<'a>(
    &'a self,
    user_id: i64,
    expected: Option<&'a str>,
    next: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn set_last_challenge_message(
    &self,
    user_id: i64,
    message_id: Option<String>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Flip `received_certificate` to true. Returns `false` if it already was.
  fn mark_certificate_received(
    &self,
    user_id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Catalog ───────────────────────────────────────────────────────────

  fn get_challenge<'a>(
    &'a self,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Challenge>, Self::Error>> + Send + 'a;

  /// The first challenge in catalog order whose id is not in `completed`.
  fn first_challenge_excluding<'a>(
    &'a self,
    completed: &'a [String],
  ) -> impl Future<Output = Result<Option<Challenge>, Self::Error>> + Send + 'a;

  /// Insert or replace a challenge and its elements. Catalog position of an
  /// existing challenge is kept.
  fn upsert_challenge(
    &self,
    challenge: Challenge,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Mailings ──────────────────────────────────────────────────────────

  fn add_mailing(
    &self,
    mailing: NewMailing,
  ) -> impl Future<Output = Result<Mailing, Self::Error>> + Send + '_;

  /// Mailings with `send_at <= now`, oldest first.
  fn due_mailings(
    &self,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<Mailing>, Self::Error>> + Send + '_;
}
