//! Challenge completion: scoring a submission and recording its effects.
//!
//! Order of effects:
//!
//! 1. the user must have a current challenge;
//! 2. the submission is scored;
//! 3. the per-challenge score, the rolling average and the leaderboard entry
//!    are written to the cache in one atomic step, which also reports whether
//!    this is the first completion of that challenge;
//! 4. the durable user row is updated in one transaction;
//! 5. a follow-up message is queued.
//!
//! Cache writes are idempotent, so a request that fails after step 3 can be
//! retried as a whole. The durable write only stamps `last_completed_at` if
//! it is still unset and the user is still on the scored challenge, so a
//! retry never moves the cooldown. The durable average carries the cache
//! revision it was computed at and never goes back to an older one.

use chrono::{DateTime, Utc};

use crate::{
  Engine, Error, Result,
  cache::{RankingCache, ScoreUpdate},
  messenger::OutgoingMessage,
  model::{Placement, Player},
  outbox::Notification,
  scoring,
  store::{CompletionUpdate, ProgressStore},
};

/// What a completion changed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
  pub challenge_id:     String,
  pub score:            f64,
  pub average_score:    f64,
  /// Whether this was the user's first scored attempt at the challenge.
  pub first_completion: bool,
}

impl<S, C> Engine<S, C>
where
  S: ProgressStore,
  C: RankingCache,
{
  /// Score `placements` against the player's current challenge.
  pub async fn complete_challenge(
    &self,
    player: &Player,
    placements: &[Placement],
    now: DateTime<Utc>,
  ) -> Result<CompletionOutcome> {
    let challenge = player
      .current_challenge
      .as_ref()
      .ok_or(Error::NoActiveChallenge)?;
    let user_id = player.user.id;

    let score = scoring::score(&challenge.elements, placements);

    let ScoreUpdate { first_completion, average_score, revision } = self
      .cache
      .record_score(user_id, &challenge.id, score)
      .await
      .map_err(Error::cache)?;

    // A missing stamp on a repeat attempt means an earlier request died
    // between the cache and the store; stamping now repairs it.
    let stamp = first_completion || player.user.last_completed_at.is_none();

    self
      .store
      .record_completion(CompletionUpdate {
        user_id,
        challenge_id: challenge.id.clone(),
        average_score,
        average_revision: revision,
        completed_at: stamp.then_some(now),
      })
      .await
      .map_err(Error::store)?;

    tracing::info!(
      user_id,
      challenge_id = %challenge.id,
      score,
      average_score,
      first_completion,
      "challenge completed"
    );

    let place = match self.cache.user_rank(user_id).await {
      Ok(rank) => rank.map(|r| r + 1),
      Err(e) => {
        tracing::warn!(user_id, error = %e, "could not read leaderboard place");
        None
      }
    };

    self.outbox.enqueue(Notification::Message {
      user_id,
      message: follow_up(&challenge.name, score, average_score, place, first_completion),
    });

    Ok(CompletionOutcome {
      challenge_id: challenge.id.clone(),
      score,
      average_score,
      first_completion,
    })
  }
}

fn follow_up(
  challenge_name: &str,
  score: f64,
  average_score: f64,
  place: Option<u64>,
  first_completion: bool,
) -> OutgoingMessage {
  let mut text = format!(
    "<b>{challenge_name}</b>: {score}% accuracy.\nYour average is {average_score}%."
  );
  if let Some(place) = place {
    text.push_str(&format!("\nPlace on the leaderboard: {place} 🎖️"));
  }
  if first_completion {
    text.push_str("\n\nA new location unlocks tomorrow morning.");
  }
  OutgoingMessage::text(text)
}
