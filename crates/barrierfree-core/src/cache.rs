//! The `RankingCache` trait, holding fast and ephemeral game facts.
//!
//! Holds per-user per-challenge scores, the global leaderboard of average
//! scores and one-shot mailing markers. Missing keys always read as "no data
//! yet". Writes are idempotent: setting the same score twice is harmless.
//!
//! A completion goes through [`RankingCache::record_score`], which writes the
//! challenge score, the new average and the leaderboard entry in one step.
//! Two devices submitting at once therefore cannot leave the leaderboard on
//! an average that no longer matches the stored scores.

use std::{collections::BTreeSet, future::Future};

/// One leaderboard row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankEntry {
  pub user_id: i64,
  pub score:   f64,
}

/// Result of [`RankingCache::record_score`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreUpdate {
  /// No score was stored for the challenge before.
  pub first_completion: bool,
  /// The user's average after the write, as now on the leaderboard.
  pub average_score:    f64,
  /// Grows with every recorded score of the user. Durable copies of the
  /// average keep the value with the highest revision.
  pub revision:         i64,
}

pub trait RankingCache: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Leaderboard ───────────────────────────────────────────────────────

  /// Set a user's leaderboard score (their average).
  fn set_user_score(
    &self,
    user_id: i64,
    score: f64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Top `limit` users, best score first.
  fn leaderboard(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<RankEntry>, Self::Error>> + Send + '_;

  /// Zero-based rank of a user, best first. `None` if unranked.
  fn user_rank(
    &self,
    user_id: i64,
  ) -> impl Future<Output = Result<Option<u64>, Self::Error>> + Send + '_;

  // ── Per-challenge scores ──────────────────────────────────────────────

  /// Store a challenge score. Returns `true` if none was stored before.
  ///
  /// The presence test and the write are one atomic operation.
  fn set_user_challenge_score<'a>(
    &'a self,
    user_id: i64,
    challenge_id: &'a str,
    score: f64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Store a challenge score, recompute the user's average and put it on
  /// the leaderboard, all as one atomic operation.
  fn record_score<'a>(
    &'a self,
    user_id: i64,
    challenge_id: &'a str,
    score: f64,
  ) -> impl Future<Output = Result<ScoreUpdate, Self::Error>> + Send + 'a;

  fn get_user_challenge_score<'a>(
    &'a self,
    user_id: i64,
    challenge_id: &'a str,
  ) -> impl Future<Output = Result<Option<f64>, Self::Error>> + Send + 'a;

  /// Ids of every challenge the user has a score for.
  fn get_user_completed_challenges(
    &self,
    user_id: i64,
  ) -> impl Future<Output = Result<BTreeSet<String>, Self::Error>> + Send + '_;

  /// Mean of the user's challenge scores rounded to one decimal, 0.0 if none.
  fn get_user_average_score(
    &self,
    user_id: i64,
  ) -> impl Future<Output = Result<f64, Self::Error>> + Send + '_;

  // ── Dedup markers ─────────────────────────────────────────────────────

  /// Atomically mark a mailing as sent to a user. Returns `true` if it was
  /// already marked.
  fn mark_mailing_sent(
    &self,
    user_id: i64,
    mailing_id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}

/// Mean of `scores` rounded to one decimal, 0.0 for an empty slice.
pub fn average(scores: &[f64]) -> f64 {
  if scores.is_empty() {
    return 0.0;
  }
  crate::scoring::round1(scores.iter().sum::<f64>() / scores.len() as f64)
}
