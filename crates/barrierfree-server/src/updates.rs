//! Long polling of bot updates and routing them to the chat flows.

use std::time::Duration;

use barrierfree_core::{
  Engine, cache::RankingCache, flows, model::NewUser, store::ProgressStore,
};
use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::bot::BotClient;

/// Pause after a failed poll before trying again.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

// ─── Wire types ──────────────────────────────────────────────────────────────

/// One `GET /updates` reply.
#[derive(Debug, Deserialize)]
pub struct UpdateBatch {
  #[serde(default)]
  pub updates: Vec<Update>,
  pub marker:  Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "update_type", rename_all = "snake_case")]
pub enum Update {
  MessageCreated { message: IncomingMessage },
  MessageCallback {
    callback: Callback,
    #[serde(default)]
    message:  Option<IncomingMessage>,
  },
  #[serde(other)]
  Other,
}

#[derive(Debug, Deserialize)]
pub struct Sender {
  pub user_id:    i64,
  #[serde(default)]
  pub first_name: String,
  #[serde(default)]
  pub username:   Option<String>,
  #[serde(default)]
  pub avatar_url: Option<String>,
}

impl Sender {
  fn to_new_user(&self) -> NewUser {
    NewUser {
      id:         self.user_id,
      name:       self.first_name.clone(),
      username:   self.username.clone(),
      avatar_url: self.avatar_url.clone(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
  pub sender: Option<Sender>,
  pub body:   MessageBody,
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
  pub mid:  String,
  #[serde(default)]
  pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Callback {
  pub user:    Sender,
  #[serde(default)]
  pub payload: Option<String>,
}

// ─── Routing ─────────────────────────────────────────────────────────────────

/// Apply one update to the game.
pub async fn handle<S, C>(engine: &Engine<S, C>, update: Update) -> barrierfree_core::Result<()>
where
  S: ProgressStore,
  C: RankingCache,
{
  match update {
    Update::MessageCreated { message } => {
      let Some(sender) = message.sender else {
        return Ok(());
      };
      let text = message.body.text.as_deref().unwrap_or_default().trim();
      if text == "/start" || text.starts_with("/start ") {
        engine.start(sender.to_new_user()).await?;
      }
      Ok(())
    }

    Update::MessageCallback { callback, message } => {
      let pressed = message.map(|m| m.body.mid);
      match callback.payload.as_deref() {
        Some(flows::CONTINUE) => engine.show_leaderboard(callback.user.user_id, pressed).await,
        Some(flows::OPEN_CHALLENGE) => {
          engine.open_challenge(callback.user.user_id, pressed, Utc::now()).await
        }
        other => {
          tracing::debug!(payload = ?other, "ignoring unknown callback");
          Ok(())
        }
      }
    }

    Update::Other => Ok(()),
  }
}

/// Poll for updates until `cancel` fires.
pub async fn run<S, C>(
  bot: BotClient,
  engine: Engine<S, C>,
  poll_timeout: Duration,
  cancel: CancellationToken,
) where
  S: ProgressStore,
  C: RankingCache,
{
  tracing::info!(timeout_secs = poll_timeout.as_secs(), "update polling started");
  let mut marker = None;

  loop {
    let batch = tokio::select! {
      _ = cancel.cancelled() => break,
      batch = bot.get_updates(marker, poll_timeout) => batch,
    };

    match batch {
      Ok(batch) => {
        if batch.marker.is_some() {
          marker = batch.marker;
        }
        for update in batch.updates {
          if let Err(e) = handle(&engine, update).await {
            tracing::error!(error = %e, "update handling failed");
          }
        }
      }
      Err(e) => {
        tracing::warn!(error = %e, "polling for updates failed");
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = tokio::time::sleep(RETRY_BACKOFF) => {}
        }
      }
    }
  }

  tracing::info!("update polling stopped");
}
