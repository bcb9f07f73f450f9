//! In-memory doubles of the backend traits for unit tests.
//!
//! `FakeStore` reproduces the atomic write semantics of the real store
//! (compare-and-swap on the current challenge, keep-first stamp) so the
//! orchestration tests exercise the same interleavings.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap},
  path::Path,
  sync::Arc,
};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, oneshot};

use crate::{
  Engine,
  cache::{RankEntry, RankingCache, ScoreUpdate, average},
  engine::GameSettings,
  messenger::{Messenger, OutgoingMessage},
  model::{Challenge, ChallengeElement, Mailing, NewMailing, NewUser, Player, User},
  outbox::Outbox,
  progression::GameClock,
  store::{CompletionUpdate, ProgressStore},
};

#[derive(Debug, thiserror::Error)]
#[error("fake backend failure")]
pub struct FakeError;

// ─── Builders ────────────────────────────────────────────────────────────────

pub fn user(id: i64) -> User {
  User {
    id,
    created_at: DateTime::UNIX_EPOCH,
    name: format!("user-{id}"),
    username: None,
    avatar_url: None,
    average_score: 0.0,
    last_completed_at: None,
    current_challenge_id: None,
    last_challenge_message_id: None,
    received_certificate: false,
  }
}

pub fn challenge(id: &str) -> Challenge { challenge_with(id, vec![]) }

pub fn challenge_with(id: &str, elements: Vec<ChallengeElement>) -> Challenge {
  Challenge {
    id: id.to_string(),
    name: format!("Location {id}"),
    description: format!("Furnish <b>{id}</b>"),
    scene_width: 1000.0,
    scene_height: 1000.0,
    elements,
  }
}

pub fn engine(
  store: Arc<FakeStore>,
  cache: Arc<FakeCache>,
  outbox: Outbox,
) -> Engine<FakeStore, FakeCache> {
  let settings = GameSettings {
    app_link:          "https://max.ru/app/barrierfree".into(),
    certificate_image: None,
  };
  Engine::new(store, cache, outbox, GameClock::utc(), settings)
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
  users:     BTreeMap<i64, User>,
  revisions: BTreeMap<i64, i64>,
  catalog:   Vec<Challenge>,
  mailings:  Vec<Mailing>,
}

struct Gate {
  parked:  oneshot::Sender<()>,
  release: oneshot::Receiver<()>,
}

#[derive(Default)]
pub struct FakeStore {
  state: Mutex<StoreState>,
  gate:  std::sync::Mutex<Option<Gate>>,
}

impl FakeStore {
  pub fn with_catalog(catalog: Vec<Challenge>) -> Self {
    Self {
      state: Mutex::new(StoreState { catalog, ..Default::default() }),
      gate:  Default::default(),
    }
  }

  /// Stall the next `record_completion` before it writes anything. The
  /// returned receiver fires once a call is waiting; sending on the sender
  /// lets it carry on.
  pub fn hold_next_completion(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
    let (parked_tx, parked_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel();
    *self.gate.lock().unwrap() = Some(Gate { parked: parked_tx, release: release_rx });
    (parked_rx, release_tx)
  }

  pub async fn insert_user(&self, id: i64, name: &str) -> User {
    let mut u = user(id);
    u.name = name.to_string();
    self.state.lock().await.users.insert(id, u.clone());
    u
  }

  pub async fn set_current(&self, id: i64, challenge_id: Option<&str>) {
    let mut state = self.state.lock().await;
    if let Some(u) = state.users.get_mut(&id) {
      u.current_challenge_id = challenge_id.map(str::to_string);
    }
  }
}

impl ProgressStore for FakeStore {
  type Error = FakeError;

  async fn get_or_create_user(&self, new: NewUser) -> Result<User, FakeError> {
    let mut state = self.state.lock().await;
    let u = state.users.entry(new.id).or_insert_with(|| User {
      name: new.name,
      username: new.username,
      avatar_url: new.avatar_url,
      ..user(new.id)
    });
    Ok(u.clone())
  }

  async fn get_user(&self, id: i64) -> Result<Option<User>, FakeError> {
    Ok(self.state.lock().await.users.get(&id).cloned())
  }

  async fn load_player(&self, id: i64) -> Result<Option<Player>, FakeError> {
    let state = self.state.lock().await;
    let Some(user) = state.users.get(&id).cloned() else {
      return Ok(None);
    };
    let current_challenge = user
      .current_challenge_id
      .as_ref()
      .and_then(|cid| state.catalog.iter().find(|c| &c.id == cid).cloned());
    Ok(Some(Player { user, current_challenge }))
  }

  async fn list_users(&self) -> Result<Vec<User>, FakeError> {
    Ok(self.state.lock().await.users.values().cloned().collect())
  }

  async fn record_completion(&self, update: CompletionUpdate) -> Result<(), FakeError> {
    let gate = self.gate.lock().unwrap().take();
    if let Some(gate) = gate {
      let _ = gate.parked.send(());
      let _ = gate.release.await;
    }

    let mut state = self.state.lock().await;
    let StoreState { users, revisions, .. } = &mut *state;
    let u = users.get_mut(&update.user_id).ok_or(FakeError)?;
    let revision = revisions.entry(update.user_id).or_default();
    if update.average_revision > *revision {
      *revision = update.average_revision;
      u.average_score = update.average_score;
    }
    let on_challenge = u.current_challenge_id.as_deref() == Some(update.challenge_id.as_str());
    if let Some(at) = update.completed_at.filter(|_| on_challenge) {
      u.last_completed_at.get_or_insert(at);
    }
    Ok(())
  }

  async fn switch_challenge(
    &self,
    user_id: i64,
    expected: Option<&str>,
    next: &str,
  ) -> Result<bool, FakeError> {
    let mut state = self.state.lock().await;
    let u = state.users.get_mut(&user_id).ok_or(FakeError)?;
    if u.current_challenge_id.as_deref() != expected {
      return Ok(false);
    }
    u.current_challenge_id = Some(next.to_string());
    u.last_completed_at = None;
    Ok(true)
  }

  async fn set_last_challenge_message(
    &self,
    user_id: i64,
    message_id: Option<String>,
  ) -> Result<(), FakeError> {
    let mut state = self.state.lock().await;
    let u = state.users.get_mut(&user_id).ok_or(FakeError)?;
    u.last_challenge_message_id = message_id;
    Ok(())
  }

  async fn mark_certificate_received(&self, user_id: i64) -> Result<bool, FakeError> {
    let mut state = self.state.lock().await;
    let u = state.users.get_mut(&user_id).ok_or(FakeError)?;
    let flipped = !u.received_certificate;
    u.received_certificate = true;
    Ok(flipped)
  }

  async fn get_challenge(&self, id: &str) -> Result<Option<Challenge>, FakeError> {
    Ok(self.state.lock().await.catalog.iter().find(|c| c.id == id).cloned())
  }

  async fn first_challenge_excluding(
    &self,
    completed: &[String],
  ) -> Result<Option<Challenge>, FakeError> {
    let state = self.state.lock().await;
    Ok(state.catalog.iter().find(|c| !completed.contains(&c.id)).cloned())
  }

  async fn upsert_challenge(&self, challenge: Challenge) -> Result<(), FakeError> {
    let mut state = self.state.lock().await;
    match state.catalog.iter_mut().find(|c| c.id == challenge.id) {
      Some(existing) => *existing = challenge,
      None => state.catalog.push(challenge),
    }
    Ok(())
  }

  async fn add_mailing(&self, mailing: NewMailing) -> Result<Mailing, FakeError> {
    let mut state = self.state.lock().await;
    let mailing = Mailing {
      id:           state.mailings.len() as i64 + 1,
      send_at:      mailing.send_at,
      message_text: mailing.message_text,
      button_text:  mailing.button_text,
      button_url:   mailing.button_url,
    };
    state.mailings.push(mailing.clone());
    Ok(mailing)
  }

  async fn due_mailings(&self, now: DateTime<Utc>) -> Result<Vec<Mailing>, FakeError> {
    let state = self.state.lock().await;
    Ok(state.mailings.iter().filter(|m| m.send_at <= now).cloned().collect())
  }
}

// ─── Cache ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CacheState {
  ratings:   HashMap<i64, f64>,
  scores:    HashMap<i64, BTreeMap<String, f64>>,
  revisions: HashMap<i64, i64>,
  mailed:    BTreeSet<(i64, i64)>,
}

#[derive(Default)]
pub struct FakeCache {
  state: Mutex<CacheState>,
}

impl FakeCache {
  fn ranked(state: &CacheState) -> Vec<RankEntry> {
    let mut rows: Vec<RankEntry> = state
      .ratings
      .iter()
      .map(|(&user_id, &score)| RankEntry { user_id, score })
      .collect();
    rows.sort_by(|a, b| b.score.total_cmp(&a.score).then(b.user_id.cmp(&a.user_id)));
    rows
  }
}

impl RankingCache for FakeCache {
  type Error = FakeError;

  async fn set_user_score(&self, user_id: i64, score: f64) -> Result<(), FakeError> {
    self.state.lock().await.ratings.insert(user_id, score);
    Ok(())
  }

  async fn leaderboard(&self, limit: usize) -> Result<Vec<RankEntry>, FakeError> {
    let state = self.state.lock().await;
    Ok(Self::ranked(&state).into_iter().take(limit).collect())
  }

  async fn user_rank(&self, user_id: i64) -> Result<Option<u64>, FakeError> {
    let state = self.state.lock().await;
    Ok(
      Self::ranked(&state)
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
  ) -> Result<bool, FakeError> {
    let mut state = self.state.lock().await;
    let previous = state
      .scores
      .entry(user_id)
      .or_default()
      .insert(challenge_id.to_string(), score);
    Ok(previous.is_none())
  }

  async fn record_score(
    &self,
    user_id: i64,
    challenge_id: &str,
    score: f64,
  ) -> Result<ScoreUpdate, FakeError> {
    let mut state = self.state.lock().await;
    let scores = state.scores.entry(user_id).or_default();
    let first_completion = scores.insert(challenge_id.to_string(), score).is_none();
    let average_score = average(&scores.values().copied().collect::<Vec<_>>());
    state.ratings.insert(user_id, average_score);
    let revision = state.revisions.entry(user_id).or_default();
    *revision += 1;
    Ok(ScoreUpdate { first_completion, average_score, revision: *revision })
  }

  async fn get_user_challenge_score(
    &self,
    user_id: i64,
    challenge_id: &str,
  ) -> Result<Option<f64>, FakeError> {
    let state = self.state.lock().await;
    Ok(state.scores.get(&user_id).and_then(|s| s.get(challenge_id).copied()))
  }

  async fn get_user_completed_challenges(
    &self,
    user_id: i64,
  ) -> Result<BTreeSet<String>, FakeError> {
    let state = self.state.lock().await;
    Ok(
      state
        .scores
        .get(&user_id)
        .map(|s| s.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  async fn get_user_average_score(&self, user_id: i64) -> Result<f64, FakeError> {
    let state = self.state.lock().await;
    let scores: Vec<f64> = state
      .scores
      .get(&user_id)
      .map(|s| s.values().copied().collect())
      .unwrap_or_default();
    Ok(average(&scores))
  }

  async fn mark_mailing_sent(&self, user_id: i64, mailing_id: i64) -> Result<bool, FakeError> {
    Ok(!self.state.lock().await.mailed.insert((user_id, mailing_id)))
  }
}

// ─── Messenger ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
  Message { user_id: i64, message: OutgoingMessage },
  Delete(String),
}

#[derive(Default)]
pub struct RecordingMessenger {
  fail: bool,
  log:  Mutex<Vec<Sent>>,
}

impl RecordingMessenger {
  pub fn failing() -> Self { Self { fail: true, ..Default::default() } }

  pub async fn log(&self) -> Vec<Sent> { self.log.lock().await.clone() }
}

impl Messenger for RecordingMessenger {
  type Error = FakeError;

  async fn send(&self, user_id: i64, message: OutgoingMessage) -> Result<Option<String>, FakeError> {
    if self.fail {
      return Err(FakeError);
    }
    let mut log = self.log.lock().await;
    log.push(Sent::Message { user_id, message });
    let sends = log.iter().filter(|s| matches!(s, Sent::Message { .. })).count();
    Ok(Some(format!("mid-{sends}")))
  }

  async fn delete(&self, message_id: &str) -> Result<(), FakeError> {
    if self.fail {
      return Err(FakeError);
    }
    self.log.lock().await.push(Sent::Delete(message_id.to_string()));
    Ok(())
  }

  async fn upload_image(&self, path: &Path) -> Result<String, FakeError> {
    if self.fail {
      return Err(FakeError);
    }
    Ok(format!("image:{}", path.display()))
  }
}
