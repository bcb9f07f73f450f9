//! Recurring sweeps: daily progression and scheduled mailings.
//!
//! Both sweeps are safe to run concurrently with user requests and with
//! another tick of themselves. Progression is gated on the completed set and
//! written with a compare-and-swap; mailings are deduplicated with an atomic
//! marker in the cache. A failure for one user is logged and the sweep moves
//! on to the next.

use chrono::{DateTime, Utc};

use crate::{
  Engine, Error, Result,
  cache::RankingCache,
  flows::OPEN_CHALLENGE,
  messenger::{Button, OutgoingMessage},
  model::{Mailing, User},
  outbox::Notification,
  progression::{Advance, advance_to_next_challenge, due_for_next},
  store::ProgressStore,
};

/// Counts from one daily progression sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyReport {
  pub advanced:     usize,
  pub certificates: usize,
  pub skipped:      usize,
  pub failed:       usize,
}

/// Counts from one mailing sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailingReport {
  pub delivered: usize,
  pub duplicate: usize,
  pub failed:    usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DailyStep {
  Advanced,
  Certificate,
  Skipped,
}

impl<S, C> Engine<S, C>
where
  S: ProgressStore,
  C: RankingCache,
{
  // ── Daily progression ─────────────────────────────────────────────────────

  /// Advance every user whose cooldown has elapsed and who finished their
  /// current challenge.
  pub async fn run_daily_progression(&self, now: DateTime<Utc>) -> Result<DailyReport> {
    let users = self.store.list_users().await.map_err(Error::store)?;
    let mut report = DailyReport::default();

    for user in &users {
      match self.progress_user(user, now).await {
        Ok(DailyStep::Advanced) => report.advanced += 1,
        Ok(DailyStep::Certificate) => report.certificates += 1,
        Ok(DailyStep::Skipped) => report.skipped += 1,
        Err(e) => {
          report.failed += 1;
          tracing::error!(user_id = user.id, error = %e, "daily progression failed for user");
        }
      }
    }

    tracing::info!(
      advanced = report.advanced,
      certificates = report.certificates,
      skipped = report.skipped,
      failed = report.failed,
      "daily progression finished"
    );
    Ok(report)
  }

  async fn progress_user(&self, user: &User, now: DateTime<Utc>) -> Result<DailyStep> {
    if user.current_challenge_id.is_none() {
      return Ok(DailyStep::Skipped);
    }

    let completed = self
      .cache
      .get_user_completed_challenges(user.id)
      .await
      .map_err(Error::cache)?;
    if !due_for_next(user, &completed, now, &self.clock) {
      return Ok(DailyStep::Skipped);
    }

    match advance_to_next_challenge(self.store.as_ref(), user, &completed).await? {
      Advance::Advanced(_) => {
        self.outbox.enqueue(Notification::Message {
          user_id: user.id,
          message: OutgoingMessage::text(
            "Good morning! A new location is waiting for you today. \
             Ready to keep building a city without barriers?",
          )
          .with_button(Button::callback("Go!", OPEN_CHALLENGE)),
        });
        Ok(DailyStep::Advanced)
      }
      Advance::Exhausted => self.award_certificate(user).await,
      Advance::Superseded => Ok(DailyStep::Skipped),
    }
  }

  /// Send the final certificate once per user.
  async fn award_certificate(&self, user: &User) -> Result<DailyStep> {
    if user.received_certificate {
      return Ok(DailyStep::Skipped);
    }
    let newly_marked = self
      .store
      .mark_certificate_received(user.id)
      .await
      .map_err(Error::store)?;
    if !newly_marked {
      return Ok(DailyStep::Skipped);
    }

    let average = self
      .cache
      .get_user_average_score(user.id)
      .await
      .map_err(Error::cache)?;

    tracing::info!(user_id = user.id, average, "all challenges complete; certificate awarded");
    self.outbox.enqueue(Notification::Certificate {
      user_id: user.id,
      message: OutgoingMessage::text(format!(
        "Congratulations, {}! You have completed every location.\n\
         Accessibility level reached: {average:.0}%\n\
         Title awarded: <b>Barrier-free architect</b>",
        user.name
      )),
      image:   self.settings.certificate_image.clone(),
    });
    Ok(DailyStep::Certificate)
  }

  // ── Mailings ──────────────────────────────────────────────────────────────

  /// Deliver every due mailing to every user who has not had it yet.
  pub async fn run_mailing_sweep(&self, now: DateTime<Utc>) -> Result<MailingReport> {
    let mailings = self.store.due_mailings(now).await.map_err(Error::store)?;
    let mut report = MailingReport::default();
    if mailings.is_empty() {
      return Ok(report);
    }

    let users = self.store.list_users().await.map_err(Error::store)?;
    for mailing in &mailings {
      for user in &users {
        match self.deliver_mailing(user.id, mailing).await {
          Ok(true) => report.delivered += 1,
          Ok(false) => report.duplicate += 1,
          Err(e) => {
            report.failed += 1;
            tracing::error!(user_id = user.id, mailing_id = mailing.id, error = %e, "mailing failed for user");
          }
        }
      }
    }

    if report.delivered > 0 || report.failed > 0 {
      tracing::info!(
        delivered = report.delivered,
        failed = report.failed,
        "mailing sweep finished"
      );
    }
    Ok(report)
  }

  async fn deliver_mailing(&self, user_id: i64, mailing: &Mailing) -> Result<bool> {
    let already_sent = self
      .cache
      .mark_mailing_sent(user_id, mailing.id)
      .await
      .map_err(Error::cache)?;
    if already_sent {
      return Ok(false);
    }

    self.outbox.enqueue(Notification::Message {
      user_id,
      message: OutgoingMessage::text(mailing.message_text.clone())
        .with_button(Button::link(mailing.button_text.clone(), mailing.button_url.clone())),
    });
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use std::{path::PathBuf, sync::Arc};

  use super::*;
  use crate::{
    fakes::{FakeCache, FakeStore, challenge, engine},
    model::{NewMailing, Placement},
    outbox::{Outbox, OutboxReceiver},
  };

  fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
  }

  async fn setup(ids: &[&str]) -> (Engine<FakeStore, FakeCache>, OutboxReceiver) {
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

  async fn complete(engine: &Engine<FakeStore, FakeCache>, user_id: i64, when: DateTime<Utc>) {
    let player = engine.store.load_player(user_id).await.unwrap().unwrap();
    engine
      .complete_challenge(&player, &[Placement { id: "el".into(), x: 0.0, y: 0.0 }], when)
      .await
      .unwrap();
  }

  // ── Daily progression ─────────────────────────────────────────────────────

  #[tokio::test]
  async fn advances_completed_user_on_next_day() {
    let (engine, mut rx) = setup(&["a", "b"]).await;
    engine.store.insert_user(1, "Ann").await;
    engine.store.set_current(1, Some("a")).await;
    complete(&engine, 1, at("2025-03-01T15:00:00Z")).await;
    drain(&mut rx);

    let report = engine.run_daily_progression(at("2025-03-02T07:00:00Z")).await.unwrap();
    assert_eq!(report.advanced, 1);

    let user = engine.store.get_user(1).await.unwrap().unwrap();
    assert_eq!(user.current_challenge_id.as_deref(), Some("b"));
    assert_eq!(user.last_completed_at, None);

    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0], Notification::Message { user_id: 1, message }
      if message.buttons == vec![Button::callback("Go!", OPEN_CHALLENGE)]));
  }

  #[tokio::test]
  async fn same_day_completion_waits() {
    let (engine, _rx) = setup(&["a", "b"]).await;
    engine.store.insert_user(1, "Ann").await;
    engine.store.set_current(1, Some("a")).await;
    complete(&engine, 1, at("2025-03-02T06:00:00Z")).await;

    let report = engine.run_daily_progression(at("2025-03-02T07:00:00Z")).await.unwrap();
    assert_eq!(report.advanced, 0);
    let user = engine.store.get_user(1).await.unwrap().unwrap();
    assert_eq!(user.current_challenge_id.as_deref(), Some("a"));
  }

  #[tokio::test]
  async fn unfinished_challenge_is_not_advanced() {
    let (engine, _rx) = setup(&["a", "b"]).await;
    engine.store.insert_user(1, "Ann").await;
    engine.store.set_current(1, Some("a")).await;

    let report = engine.run_daily_progression(at("2025-03-02T07:00:00Z")).await.unwrap();
    assert_eq!(report, DailyReport { skipped: 1, ..Default::default() });
  }

  #[tokio::test]
  async fn second_sweep_is_a_no_op() {
    let (engine, _rx) = setup(&["a", "b", "c"]).await;
    engine.store.insert_user(1, "Ann").await;
    engine.store.set_current(1, Some("a")).await;
    complete(&engine, 1, at("2025-03-01T15:00:00Z")).await;

    let now = at("2025-03-02T07:00:00Z");
    engine.run_daily_progression(now).await.unwrap();
    let again = engine.run_daily_progression(now).await.unwrap();

    assert_eq!(again.advanced, 0);
    let user = engine.store.get_user(1).await.unwrap().unwrap();
    assert_eq!(user.current_challenge_id.as_deref(), Some("b"));
  }

  #[tokio::test]
  async fn finishing_last_challenge_awards_certificate_once() {
    let (mut engine, mut rx) = setup(&["only"]).await;
    Arc::get_mut(&mut engine.settings).unwrap().certificate_image =
      Some(PathBuf::from("cert.png"));
    engine.store.insert_user(1, "Ann").await;
    engine.store.set_current(1, Some("only")).await;
    complete(&engine, 1, at("2025-03-01T15:00:00Z")).await;
    drain(&mut rx);

    let now = at("2025-03-02T07:00:00Z");
    let report = engine.run_daily_progression(now).await.unwrap();
    assert_eq!(report.certificates, 1);
    let again = engine.run_daily_progression(now).await.unwrap();
    assert_eq!(again.certificates, 0);

    let user = engine.store.get_user(1).await.unwrap().unwrap();
    assert!(user.received_certificate);
    assert_eq!(user.current_challenge_id.as_deref(), Some("only"));

    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0], Notification::Certificate { user_id: 1, image: Some(_), .. }));

    // The final average is still on the leaderboard.
    let board = engine.cache.leaderboard(10).await.unwrap();
    assert_eq!(board[0].user_id, 1);
    assert_eq!(board[0].score, 100.0);
  }

  // ── Mailings ──────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn mailing_is_sent_once_per_user() {
    let (engine, mut rx) = setup(&["a"]).await;
    engine.store.insert_user(1, "Ann").await;
    engine.store.insert_user(2, "Bob").await;
    engine
      .store
      .add_mailing(NewMailing {
        send_at:      at("2025-03-01T09:00:00Z"),
        message_text: "Weekend meetup!".into(),
        button_text:  "Details".into(),
        button_url:   "https://example.org/meetup".into(),
      })
      .await
      .unwrap();
    engine
      .store
      .add_mailing(NewMailing {
        send_at:      at("2025-04-01T09:00:00Z"),
        message_text: "Not yet".into(),
        button_text:  "Later".into(),
        button_url:   "https://example.org/later".into(),
      })
      .await
      .unwrap();

    let now   = at("2025-03-01T09:01:00Z");
    let first = engine.run_mailing_sweep(now).await.unwrap();
    let again = engine.run_mailing_sweep(now).await.unwrap();

    assert_eq!(first.delivered, 2);
    assert_eq!(again, MailingReport { duplicate: 2, ..Default::default() });
    let sent = drain(&mut rx);
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|n| matches!(n, Notification::Message { message, .. }
      if message.text == "Weekend meetup!")));
  }
}
