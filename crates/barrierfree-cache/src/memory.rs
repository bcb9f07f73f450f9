//! [`MemoryCache`], an in-process [`RankingCache`].

use std::{
  collections::{BTreeMap, BTreeSet, HashMap},
  convert::Infallible,
};

use barrierfree_core::cache::{RankEntry, RankingCache, ScoreUpdate, average};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct State {
  ratings:   HashMap<i64, f64>,
  scores:    HashMap<i64, BTreeMap<String, f64>>,
  revisions: HashMap<i64, i64>,
  mailed:    BTreeSet<(i64, i64)>,
}

impl State {
  /// Best first. Ties order by member descending, as a Redis sorted set
  /// read with `ZREVRANGE` does.
  fn ranked(&self) -> Vec<RankEntry> {
    let mut rows: Vec<RankEntry> = self
      .ratings
      .iter()
      .map(|(&user_id, &score)| RankEntry { user_id, score })
      .collect();
    rows.sort_by(|a, b| {
      b.score
        .total_cmp(&a.score)
        .then_with(|| b.user_id.to_string().cmp(&a.user_id.to_string()))
    });
    rows
  }
}

/// Cache state held in the process. Every operation takes one lock, which
/// gives the same atomicity as the single Redis commands it stands in for.
#[derive(Debug, Default)]
pub struct MemoryCache {
  state: Mutex<State>,
}

impl MemoryCache {
  pub fn new() -> Self { Self::default() }
}

impl RankingCache for MemoryCache {
  type Error = Infallible;

  async fn set_user_score(&self, user_id: i64, score: f64) -> Result<(), Infallible> {
    self.state.lock().await.ratings.insert(user_id, score);
    Ok(())
  }

  async fn leaderboard(&self, limit: usize) -> Result<Vec<RankEntry>, Infallible> {
    let state = self.state.lock().await;
    Ok(state.ranked().into_iter().take(limit).collect())
  }

  async fn user_rank(&self, user_id: i64) -> Result<Option<u64>, Infallible> {
    let state = self.state.lock().await;
    Ok(
      state
        .ranked()
        .iter()
        .position(|r| r.user_id == user_id)
        .map(|p| p as u64),
    )
  }

  async fn set_user_challenge_score(
    &self,
    user_id: i64,
    challenge_id: &str,
    score: f64,
  ) -> Result<bool, Infallible> {
    let mut state = self.state.lock().await;
    let previous = state
      .scores
      .entry(user_id)
      .or_default()
      .insert(challenge_id.to_owned(), score);
    Ok(previous.is_none())
  }

  async fn record_score(
    &self,
    user_id: i64,
    challenge_id: &str,
    score: f64,
  ) -> Result<ScoreUpdate, Infallible> {
    let mut state = self.state.lock().await;
    let scores = state.scores.entry(user_id).or_default();
    let first_completion = scores.insert(challenge_id.to_owned(), score).is_none();
    let average_score = average(&scores.values().copied().collect::<Vec<_>>());

    state.ratings.insert(user_id, average_score);
    let revision = state.revisions.entry(user_id).or_insert(0);
    *revision += 1;

    Ok(ScoreUpdate { first_completion, average_score, revision: *revision })
  }

  async fn get_user_challenge_score(
    &self,
    user_id: i64,
    challenge_id: &str,
  ) -> Result<Option<f64>, Infallible> {
    let state = self.state.lock().await;
    Ok(state.scores.get(&user_id).and_then(|s| s.get(challenge_id).copied()))
  }

  async fn get_user_completed_challenges(
    &self,
    user_id: i64,
  ) -> Result<BTreeSet<String>, Infallible> {
    let state = self.state.lock().await;
    Ok(
      state
        .scores
        .get(&user_id)
        .map(|s| s.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  async fn get_user_average_score(&self, user_id: i64) -> Result<f64, Infallible> {
    let state = self.state.lock().await;
    let scores: Vec<f64> = state
      .scores
      .get(&user_id)
      .map(|s| s.values().copied().collect())
      .unwrap_or_default();
    Ok(average(&scores))
  }

  async fn mark_mailing_sent(&self, user_id: i64, mailing_id: i64) -> Result<bool, Infallible> {
    Ok(!self.state.lock().await.mailed.insert((user_id, mailing_id)))
  }
}
