//! Per-user progression through the challenge catalog.
//!
//! ```text
//! NoChallenge ─▶ InProgress(X) ─complete─▶ CooldownWaiting ─next day─▶ InProgress(X+1) ─▶ … ─▶ AllComplete
//! ```
//!
//! `CooldownWaiting → InProgress` is reached either by the daily job or by
//! the user pressing "open"; both go through [`advance_to_next_challenge`].

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

use crate::{Error, Result, model::{Challenge, User}, store::ProgressStore};

// ─── Clock ───────────────────────────────────────────────────────────────────

/// The game's pinned timezone. Calendar days for the cooldown gate and the
/// daily job are both taken in this offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameClock {
  offset: FixedOffset,
}

impl GameClock {
  pub fn new(offset: FixedOffset) -> Self { Self { offset } }

  /// A clock `hours` east of UTC, `None` unless `|hours| < 24`.
  pub fn from_utc_offset_hours(hours: i32) -> Option<Self> {
    FixedOffset::east_opt(hours.checked_mul(3600)?).map(Self::new)
  }

  pub fn utc() -> Self { Self::new(Utc.fix()) }

  pub fn offset(&self) -> FixedOffset { self.offset }

  /// Calendar date of `at` in the game timezone.
  pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&self.offset).date_naive()
  }

  /// The first instant strictly after `after` at which the local wall clock
  /// reads `time`.
  pub fn next_occurrence(&self, after: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let today = self.local_date(after);
    [today, today + Duration::days(1)]
      .into_iter()
      .filter_map(|date| {
        self
          .offset
          .from_local_datetime(&date.and_time(time))
          .single()
          .map(|dt| dt.with_timezone(&Utc))
      })
      .find(|at| *at > after)
      .unwrap_or_else(|| after + Duration::days(1))
  }
}

impl Default for GameClock {
  fn default() -> Self { Self::utc() }
}

// ─── Gates ───────────────────────────────────────────────────────────────────

/// Whether the once-per-day cooldown has elapsed: true when the user never
/// completed the current challenge, or did so on an earlier calendar day.
pub fn next_challenge_ready(user: &User, now: DateTime<Utc>, clock: &GameClock) -> bool {
  match user.last_completed_at {
    None => true,
    Some(done) => clock.local_date(done) < clock.local_date(now),
  }
}

/// Whether a user should be moved on from their current challenge: they
/// have one, it is in their completed set, and the cooldown has elapsed.
///
/// Gating on the completed set makes a repeated call harmless no matter
/// who advanced the user first.
pub fn due_for_next(
  user: &User,
  completed: &BTreeSet<String>,
  now: DateTime<Utc>,
  clock: &GameClock,
) -> bool {
  match &user.current_challenge_id {
    None => false,
    Some(current) => {
      next_challenge_ready(user, now, clock) && completed.contains(current)
    }
  }
}

// ─── Advancing ───────────────────────────────────────────────────────────────

/// Result of [`advance_to_next_challenge`].
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
  /// The user now has this challenge as current.
  Advanced(Challenge),
  /// Every challenge in the catalog is completed.
  Exhausted,
  /// Someone else changed the user's current challenge first; nothing
  /// was written.
  Superseded,
}

/// Move `user` to the first catalog challenge not in `completed`.
///
/// The switch is a compare-and-swap on the user's current challenge, so
/// two concurrent callers advance the user at most once.
pub async fn advance_to_next_challenge<S: ProgressStore>(
  store: &S,
  user: &User,
  completed: &BTreeSet<String>,
) -> Result<Advance> {
  let completed: Vec<String> = completed.iter().cloned().collect();
  let Some(next) = store
    .first_challenge_excluding(&completed)
    .await
    .map_err(Error::store)?
  else {
    return Ok(Advance::Exhausted);
  };

  let switched = store
    .switch_challenge(user.id, user.current_challenge_id.as_deref(), &next.id)
    .await
    .map_err(Error::store)?;

  if switched {
    tracing::info!(user_id = user.id, challenge_id = %next.id, "advanced to next challenge");
    Ok(Advance::Advanced(next))
  } else {
    tracing::debug!(user_id = user.id, "advance lost to a concurrent update");
    Ok(Advance::Superseded)
  }
}
