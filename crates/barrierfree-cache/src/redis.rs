//! [`RedisCache`]: the Redis implementation of [`RankingCache`].
//!
//! Each operation is a single Redis command, or for [`RankingCache::record_score`]
//! a single Lua script, so the atomicity guarantees of the trait come
//! straight from Redis.

use std::{collections::BTreeSet, time::Duration};

use barrierfree_core::cache::{RankEntry, RankingCache, ScoreUpdate, average};
use bb8_redis::{
  RedisConnectionManager,
  bb8::{Pool, PooledConnection},
  redis,
};

use crate::{LEADERBOARD_KEY, Result, challenge_scores_key, mailing_key, score_revision_key};

/// KEYS: scores hash, leaderboard, revision counter.
/// ARGV: challenge id, score, user id.
///
/// Replies `{created, average, revision}`. The average goes back as the
/// string it was ranked with: Lua numbers would be truncated to integers.
/// `%.1f` is the C library's correctly rounded formatting, the same rounding
/// as `cache::average`.
const RECORD_SCORE: &str = r"
local created = redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
local scores = redis.call('HVALS', KEYS[1])
local sum = 0
for _, score in ipairs(scores) do
  sum = sum + tonumber(score)
end
local average = string.format('%.1f', sum / #scores)
redis.call('ZADD', KEYS[2], average, ARGV[3])
local revision = redis.call('INCR', KEYS[3])
return {created, average, revision}
";

/// A pooled Redis client. Cloning shares the pool.
#[derive(Clone)]
pub struct RedisCache {
  pool: Pool<RedisConnectionManager>,
}

impl RedisCache {
  /// Connect to `url` and verify the server answers.
  pub async fn connect(url: &str) -> Result<Self> {
    let manager = RedisConnectionManager::new(url)?;
    let pool = Pool::builder()
      .max_size(16)
      .connection_timeout(Duration::from_secs(5))
      .build(manager)
      .await?;

    let cache = Self { pool };
    let pong: String = redis::cmd("PING").query_async(&mut *cache.conn().await?).await?;
    tracing::info!(reply = %pong, "connected to redis");
    Ok(cache)
  }

  async fn conn(&self) -> Result<PooledConnection<'_, RedisConnectionManager>> {
    Ok(self.pool.get().await?)
  }
}

impl RankingCache for RedisCache {
  type Error = crate::Error;

  // ── Leaderboard ───────────────────────────────────────────────────────────

  async fn set_user_score(&self, user_id: i64, score: f64) -> Result<()> {
    let mut conn = self.conn().await?;
    let _: i64 = redis::cmd("ZADD")
      .arg(LEADERBOARD_KEY)
      .arg(score)
      .arg(user_id)
      .query_async(&mut *conn)
      .await?;
    Ok(())
  }

  async fn leaderboard(&self, limit: usize) -> Result<Vec<RankEntry>> {
    if limit == 0 {
      return Ok(vec![]);
    }
    let mut conn = self.conn().await?;
    let rows: Vec<(i64, f64)> = redis::cmd("ZREVRANGE")
      .arg(LEADERBOARD_KEY)
      .arg(0)
      .arg(limit as i64 - 1)
      .arg("WITHSCORES")
      .query_async(&mut *conn)
      .await?;
    Ok(
      rows
        .into_iter()
        .map(|(user_id, score)| RankEntry { user_id, score })
        .collect(),
    )
  }

  async fn user_rank(&self, user_id: i64) -> Result<Option<u64>> {
    let mut conn = self.conn().await?;
    let rank: Option<u64> = redis::cmd("ZREVRANK")
      .arg(LEADERBOARD_KEY)
      .arg(user_id)
      .query_async(&mut *conn)
      .await?;
    Ok(rank)
  }

  // ── Per-challenge scores ──────────────────────────────────────────────────

  async fn set_user_challenge_score(
    &self,
    user_id: i64,
    challenge_id: &str,
    score: f64,
  ) -> Result<bool> {
    let mut conn = self.conn().await?;
    // HSET replies with the number of fields that were newly created.
    let created: i64 = redis::cmd("HSET")
      .arg(challenge_scores_key(user_id))
      .arg(challenge_id)
      .arg(score)
      .query_async(&mut *conn)
      .await?;
    Ok(created == 1)
  }

  async fn record_score(&self, user_id: i64, challenge_id: &str, score: f64) -> Result<ScoreUpdate> {
    let mut conn = self.conn().await?;
    let (created, average_score, revision): (i64, f64, i64) = redis::cmd("EVAL")
      .arg(RECORD_SCORE)
      .arg(3)
      .arg(challenge_scores_key(user_id))
      .arg(LEADERBOARD_KEY)
      .arg(score_revision_key(user_id))
      .arg(challenge_id)
      .arg(score)
      .arg(user_id)
      .query_async(&mut *conn)
      .await?;
    Ok(ScoreUpdate { first_completion: created == 1, average_score, revision })
  }

  async fn get_user_challenge_score(&self, user_id: i64, challenge_id: &str) -> Result<Option<f64>> {
    let mut conn = self.conn().await?;
    let score: Option<f64> = redis::cmd("HGET")
      .arg(challenge_scores_key(user_id))
      .arg(challenge_id)
      .query_async(&mut *conn)
      .await?;
    Ok(score)
  }

  async fn get_user_completed_challenges(&self, user_id: i64) -> Result<BTreeSet<String>> {
    let mut conn = self.conn().await?;
    let ids: Vec<String> = redis::cmd("HKEYS")
      .arg(challenge_scores_key(user_id))
      .query_async(&mut *conn)
      .await?;
    Ok(ids.into_iter().collect())
  }

  async fn get_user_average_score(&self, user_id: i64) -> Result<f64> {
    let mut conn = self.conn().await?;
    let scores: Vec<f64> = redis::cmd("HVALS")
      .arg(challenge_scores_key(user_id))
      .query_async(&mut *conn)
      .await?;
    Ok(average(&scores))
  }

  // ── Dedup markers ─────────────────────────────────────────────────────────

  async fn mark_mailing_sent(&self, user_id: i64, mailing_id: i64) -> Result<bool> {
    let mut conn = self.conn().await?;
    // SET … GET replies with the previous value, nil if the key was new.
    let previous: Option<String> = redis::cmd("SET")
      .arg(mailing_key(user_id, mailing_id))
      .arg(1)
      .arg("GET")
      .query_async(&mut *conn)
      .await?;
    Ok(previous.is_some())
  }
}

/// Runs against a live server only when `BARRIERFREE_TEST_REDIS_URL` names
/// one. The database behind it is flushed, so point it at a scratch instance.
#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;

  async fn scratch() -> Option<RedisCache> {
    let Ok(url) = std::env::var("BARRIERFREE_TEST_REDIS_URL") else {
      eprintln!("BARRIERFREE_TEST_REDIS_URL not set, skipping");
      return None;
    };
    let cache = RedisCache::connect(&url).await.unwrap();
    let _: () = redis::cmd("FLUSHDB")
      .query_async(&mut *cache.conn().await.unwrap())
      .await
      .unwrap();
    Some(cache)
  }

  // One test: every step shares the flushed database.
  #[tokio::test]
  async fn redis_backend_round_trip() {
    let Some(cache) = scratch().await else { return };

    // Missing keys.
    assert!(cache.leaderboard(5).await.unwrap().is_empty());
    assert_eq!(cache.user_rank(1).await.unwrap(), None);
    assert_eq!(cache.get_user_challenge_score(1, "a").await.unwrap(), None);
    assert!(cache.get_user_completed_challenges(1).await.unwrap().is_empty());
    assert_eq!(cache.get_user_average_score(1).await.unwrap(), 0.0);

    // First-write detection.
    assert!(cache.set_user_challenge_score(1, "a", 30.0).await.unwrap());
    assert!(!cache.set_user_challenge_score(1, "a", 99.1).await.unwrap());
    assert_eq!(cache.get_user_challenge_score(1, "a").await.unwrap(), Some(99.1));

    // Score, average and leaderboard in one script.
    let update = cache.record_score(1, "b", 99.3).await.unwrap();
    assert_eq!(update, ScoreUpdate { first_completion: true, average_score: 99.2, revision: 1 });
    let again = cache.record_score(1, "b", 99.3).await.unwrap();
    assert!(!again.first_completion);
    assert_eq!(again.revision, 2);
    assert_eq!(cache.get_user_average_score(1).await.unwrap(), 99.2);
    assert_eq!(
      cache.get_user_completed_challenges(1).await.unwrap(),
      BTreeSet::from(["a".to_string(), "b".to_string()])
    );

    // Rank and top-N order.
    for (user, score) in [(2, 40.0), (3, 99.5), (4, 12.0)] {
      cache.set_user_score(user, score).await.unwrap();
    }
    let top = cache.leaderboard(3).await.unwrap();
    assert_eq!(top, [
      RankEntry { user_id: 3, score: 99.5 },
      RankEntry { user_id: 1, score: 99.2 },
      RankEntry { user_id: 2, score: 40.0 },
    ]);
    assert_eq!(cache.user_rank(3).await.unwrap(), Some(0));
    assert_eq!(cache.user_rank(4).await.unwrap(), Some(3));
    assert_eq!(cache.user_rank(99).await.unwrap(), None);
    assert!(cache.leaderboard(0).await.unwrap().is_empty());

    // Mailing marker.
    assert!(!cache.mark_mailing_sent(1, 10).await.unwrap());
    assert!(cache.mark_mailing_sent(1, 10).await.unwrap());
    assert!(!cache.mark_mailing_sent(2, 10).await.unwrap());

    // Concurrent completions by one user.
    let cache = Arc::new(cache);
    let writers: Vec<_> = (0..20)
      .map(|i| {
        let cache = cache.clone();
        tokio::spawn(async move {
          cache.record_score(7, &format!("c{}", i % 5), f64::from(i) * 5.0).await
        })
      })
      .collect();
    for writer in writers {
      writer.await.unwrap().unwrap();
    }
    let average = cache.get_user_average_score(7).await.unwrap();
    let rank = cache.user_rank(7).await.unwrap().unwrap();
    let board = cache.leaderboard(10).await.unwrap();
    assert_eq!(board[rank as usize], RankEntry { user_id: 7, score: average });
    assert_eq!(cache.record_score(7, "c0", 0.0).await.unwrap().revision, 21);
  }
}
