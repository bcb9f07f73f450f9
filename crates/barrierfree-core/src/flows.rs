//! Chat-command flows: `/start`, the leaderboard screen and opening the
//! current challenge.
//!
//! Every reply goes through the outbox. The flows only read and advance
//! state; scoring happens in [`crate::completion`].

use chrono::{DateTime, Utc};

use crate::{
  Engine, Error, Result,
  cache::RankingCache,
  messenger::{Button, OutgoingMessage},
  model::{NewUser, User},
  outbox::Notification,
  progression::{Advance, advance_to_next_challenge},
  store::ProgressStore,
};

/// Callback payload of the greeting's "Yes!" button.
pub const CONTINUE: &str = "continue";
/// Callback payload of every "Go!" button.
pub const OPEN_CHALLENGE: &str = "open_challenge";

const LEADERBOARD_SIZE: usize = 5;

impl<S, C> Engine<S, C>
where
  S: ProgressStore,
  C: RankingCache,
{
  /// Register the sender (if new) and greet them.
  pub async fn start(&self, new: NewUser) -> Result<User> {
    let user = self.store.get_or_create_user(new).await.map_err(Error::store)?;
    tracing::info!(user_id = user.id, "user started the bot");

    self.outbox.enqueue(Notification::Message {
      user_id: user.id,
      message: OutgoingMessage::text(format!(
        "Hi, {}! Every day a new city location appears here. Place the \
         accessibility elements where they belong and climb the leaderboard.\n\n\
         Ready to start?",
        user.name
      ))
      .with_button(Button::callback("Yes!", CONTINUE)),
    });
    Ok(user)
  }

  /// Show the top of the leaderboard and the caller's place.
  pub async fn show_leaderboard(&self, user_id: i64, pressed_message: Option<String>) -> Result<()> {
    let top = self
      .cache
      .leaderboard(LEADERBOARD_SIZE)
      .await
      .map_err(Error::cache)?;
    let rank = self.cache.user_rank(user_id).await.map_err(Error::cache)?;

    let mut text = String::from("🏆 <b>Leaderboard</b>\n");
    if top.is_empty() {
      text.push_str("\nNobody has scored yet. Be the first!\n");
    }
    for (i, entry) in top.iter().enumerate() {
      let name = match self.store.get_user(entry.user_id).await.map_err(Error::store)? {
        Some(u) => u.name,
        None => format!("#{}", entry.user_id),
      };
      text.push_str(&format!("\n{}. {} ({}%)", i + 1, name, entry.score));
    }

    match rank.map(|r| r + 1) {
      Some(1) => text.push_str("\n\nYou are in first place. Keep it up!"),
      Some(place) => {
        text.push_str(&format!("\n\nYour place: {place}. Complete today's location to climb higher!"));
      }
      None => text.push_str("\n\nComplete your first location to join the leaderboard!"),
    }

    self.outbox.enqueue(Notification::Message {
      user_id,
      message: OutgoingMessage::text(text).with_button(Button::callback("Go!", OPEN_CHALLENGE)),
    });
    if let Some(message_id) = pressed_message {
      self.outbox.enqueue(Notification::Delete { message_id });
    }
    Ok(())
  }

  /// Send the user's current challenge, moving them on first if they are due.
  pub async fn open_challenge(
    &self,
    user_id: i64,
    pressed_message: Option<String>,
    now: DateTime<Utc>,
  ) -> Result<()> {
    let user = self
      .store
      .get_user(user_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::UnknownUser(user_id))?;

    let completed = self
      .cache
      .get_user_completed_challenges(user_id)
      .await
      .map_err(Error::cache)?;

    let should_advance = user.current_challenge_id.is_none()
      || crate::progression::due_for_next(&user, &completed, now, &self.clock);

    let challenge = if should_advance {
      match advance_to_next_challenge(self.store.as_ref(), &user, &completed).await? {
        Advance::Advanced(challenge) => Some(challenge),
        // Someone else moved the user; show whatever is current now.
        Advance::Superseded => self.current_challenge(user_id).await?,
        Advance::Exhausted => None,
      }
    } else {
      self.current_challenge(user_id).await?
    };

    if let Some(message_id) = pressed_message {
      self.outbox.enqueue(Notification::Delete { message_id });
    }

    let Some(challenge) = challenge else {
      self.outbox.enqueue(Notification::Message {
        user_id,
        message: OutgoingMessage::text(
          "You have completed every location. Thank you for building a city without barriers!",
        ),
      });
      return Ok(());
    };

    self.outbox.enqueue(Notification::ChallengePrompt {
      user_id,
      previous: user.last_challenge_message_id.clone(),
      message:  OutgoingMessage::text(format!(
        "<b>{}</b>\n\n{}",
        challenge.name, challenge.description
      ))
      .with_button(Button::link("Open", self.settings.app_link.clone())),
    });
    Ok(())
  }

  async fn current_challenge(&self, user_id: i64) -> Result<Option<crate::model::Challenge>> {
    let player = self.store.load_player(user_id).await.map_err(Error::store)?;
    Ok(player.and_then(|p| p.current_challenge))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::{
    fakes::{FakeCache, FakeStore, challenge, engine},
    outbox::{Outbox, OutboxReceiver},
  };

  fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
  }

  fn setup(ids: &[&str]) -> (Engine<FakeStore, FakeCache>, OutboxReceiver) {
    let store = FakeStore::with_catalog(ids.iter().map(|id| challenge(id)).collect());
    let (outbox, rx) = Outbox::channel();
    (engine(Arc::new(store), Arc::new(FakeCache::default()), outbox), rx)
  }

  fn drain(rx: &mut OutboxReceiver) -> Vec<Notification> {
    let mut out = vec![];
    while let Some(n) = rx.try_recv() {
      out.push(n);
    }
    out
  }

  fn new_user(id: i64, name: &str) -> NewUser {
    NewUser { id, name: name.into(), username: None, avatar_url: None }
  }

  #[tokio::test]
  async fn start_registers_once_and_greets() {
    let (engine, mut rx) = setup(&["a"]);
    engine.start(new_user(1, "Ann")).await.unwrap();
    let again = engine.start(new_user(1, "Renamed")).await.unwrap();
    assert_eq!(again.name, "Ann");

    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 2);
    assert!(matches!(&sent[0], Notification::Message { user_id: 1, message }
      if message.buttons == vec![Button::callback("Yes!", CONTINUE)]));
  }

  #[tokio::test]
  async fn leaderboard_lists_names_and_place() {
    let (engine, mut rx) = setup(&["a"]);
    engine.store.insert_user(1, "Ann").await;
    engine.store.insert_user(2, "Bob").await;
    engine.cache.set_user_score(1, 90.0).await.unwrap();
    engine.cache.set_user_score(2, 70.0).await.unwrap();

    engine.show_leaderboard(2, Some("pressed".into())).await.unwrap();

    let sent = drain(&mut rx);
    match &sent[..] {
      [Notification::Message { user_id: 2, message }, Notification::Delete { message_id }] => {
        assert!(message.text.contains("1. Ann (90%)"), "{}", message.text);
        assert!(message.text.contains("2. Bob (70%)"), "{}", message.text);
        assert!(message.text.contains("Your place: 2"), "{}", message.text);
        assert_eq!(message_id, "pressed");
      }
      other => panic!("unexpected notifications: {other:?}"),
    }
  }

  #[tokio::test]
  async fn open_assigns_first_challenge() {
    let (engine, mut rx) = setup(&["a", "b"]);
    engine.store.insert_user(1, "Ann").await;

    engine.open_challenge(1, None, at("2025-03-01T10:00:00Z")).await.unwrap();

    let user = engine.store.get_user(1).await.unwrap().unwrap();
    assert_eq!(user.current_challenge_id.as_deref(), Some("a"));
    let sent = drain(&mut rx);
    assert!(matches!(&sent[..], [Notification::ChallengePrompt { user_id: 1, previous: None, message }]
      if message.text.contains("Location a")
        && message.buttons == vec![Button::link("Open", "https://max.ru/app/barrierfree")]));
  }

  #[tokio::test]
  async fn open_during_cooldown_resends_current() {
    let (engine, mut rx) = setup(&["a", "b"]);
    engine.store.insert_user(1, "Ann").await;
    engine.store.set_current(1, Some("a")).await;
    engine.store.set_last_challenge_message(1, Some("prompt-1".into())).await.unwrap();
    engine.cache.set_user_challenge_score(1, "a", 80.0).await.unwrap();
    engine
      .store
      .record_completion(crate::store::CompletionUpdate {
        user_id:          1,
        challenge_id:     "a".into(),
        average_score:    80.0,
        average_revision: 1,
        completed_at:     Some(at("2025-03-01T09:00:00Z")),
      })
      .await
      .unwrap();

    engine.open_challenge(1, None, at("2025-03-01T20:00:00Z")).await.unwrap();

    let user = engine.store.get_user(1).await.unwrap().unwrap();
    assert_eq!(user.current_challenge_id.as_deref(), Some("a"));
    let sent = drain(&mut rx);
    assert!(matches!(&sent[..], [Notification::ChallengePrompt { previous: Some(p), .. }] if p == "prompt-1"));

    // Next day the same press moves the user on.
    engine.open_challenge(1, None, at("2025-03-02T08:00:00Z")).await.unwrap();
    let user = engine.store.get_user(1).await.unwrap().unwrap();
    assert_eq!(user.current_challenge_id.as_deref(), Some("b"));
  }

  #[tokio::test]
  async fn open_with_catalog_exhausted_says_so() {
    let (engine, mut rx) = setup(&["a"]);
    engine.store.insert_user(1, "Ann").await;
    engine.store.set_current(1, Some("a")).await;
    engine.cache.set_user_challenge_score(1, "a", 100.0).await.unwrap();

    engine.open_challenge(1, Some("pressed".into()), at("2025-03-02T08:00:00Z")).await.unwrap();

    let sent = drain(&mut rx);
    assert!(matches!(&sent[..], [Notification::Delete { .. }, Notification::Message { message, .. }]
      if message.text.contains("completed every location")));
  }

  #[tokio::test]
  async fn open_for_unknown_user_fails() {
    let (engine, _rx) = setup(&["a"]);
    let err = engine.open_challenge(9, None, Utc::now()).await.unwrap_err();
    assert!(matches!(err, Error::UnknownUser(9)));
  }
}
