//! Ranking and dedup cache backends.
//!
//! [`RedisCache`] is the production backend, shared by every process that
//! serves the game. [`MemoryCache`] keeps the same data in-process and is
//! used by tests and single-node runs without Redis.

mod memory;
mod redis;

pub mod error;

pub use error::{Error, Result};
pub use memory::MemoryCache;
pub use redis::RedisCache;

// ─── Key layout ──────────────────────────────────────────────────────────────

/// Sorted set of average scores, one member per user id.
const LEADERBOARD_KEY: &str = "user:ratings";

/// Hash of challenge id → score for one user.
fn challenge_scores_key(user_id: i64) -> String { format!("user:{user_id}:ratings") }

/// Counter bumped by every recorded score of one user.
fn score_revision_key(user_id: i64) -> String { format!("user:{user_id}:ratings:revision") }

/// One-shot marker for a delivered mailing.
fn mailing_key(user_id: i64, mailing_id: i64) -> String {
  format!("user:{user_id}:mailing:{mailing_id}")
}
