//! Decoupled delivery of outbound messages.
//!
//! Request handlers and jobs never talk to the messaging platform directly.
//! They push a [`Notification`] into the [`Outbox`] and move on; a single
//! [`Dispatcher`] task drains the queue. A failed or timed-out delivery is
//! logged and dropped, it never reaches whoever enqueued it.

use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::sync::mpsc;

use crate::{
  messenger::{Messenger, OutgoingMessage},
  store::ProgressStore,
};

/// Upper bound on a single platform call.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// A unit of outbound work.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
  /// Plain message.
  Message { user_id: i64, message: OutgoingMessage },
  /// A challenge prompt that replaces the user's previous one in chat. The
  /// new message id is written back to the user record.
  ChallengePrompt {
    user_id:  i64,
    previous: Option<String>,
    message:  OutgoingMessage,
  },
  /// Final message; `image` is uploaded and attached when present.
  Certificate {
    user_id: i64,
    message: OutgoingMessage,
    image:   Option<PathBuf>,
  },
  /// Remove a message from the chat.
  Delete { message_id: String },
}

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbox {
  tx: mpsc::UnboundedSender<Notification>,
}

/// Consumer end, handed to [`Dispatcher::run`].
pub struct OutboxReceiver {
  rx: mpsc::UnboundedReceiver<Notification>,
}

impl Outbox {
  pub fn channel() -> (Outbox, OutboxReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Outbox { tx }, OutboxReceiver { rx })
  }

  /// Queue a notification. Never blocks and never fails the caller.
  pub fn enqueue(&self, notification: Notification) {
    if self.tx.send(notification).is_err() {
      tracing::warn!("outbox closed; notification dropped");
    }
  }
}

impl OutboxReceiver {
  /// Take the next queued notification, `None` once every producer is gone.
  pub async fn recv(&mut self) -> Option<Notification> { self.rx.recv().await }

  /// Take a queued notification without waiting.
  pub fn try_recv(&mut self) -> Option<Notification> { self.rx.try_recv().ok() }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// Drains the outbox into a [`Messenger`].
pub struct Dispatcher<M, S> {
  messenger: Arc<M>,
  store:     Arc<S>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

impl<M, S> Dispatcher<M, S>
where
  M: Messenger,
  S: ProgressStore,
{
  pub fn new(messenger: Arc<M>, store: Arc<S>) -> Self { Self { messenger, store } }

  /// Deliver notifications until every [`Outbox`] handle is dropped.
  pub async fn run(self, mut rx: OutboxReceiver) {
    tracing::info!("outbox dispatcher started");
    while let Some(notification) = rx.recv().await {
      self.deliver(notification).await;
    }
    tracing::info!("outbox dispatcher stopped");
  }

  /// Deliver one notification, logging instead of returning failures.
  pub async fn deliver(&self, notification: Notification) {
    let kind = match &notification {
      Notification::Message { .. } => "message",
      Notification::ChallengePrompt { .. } => "challenge_prompt",
      Notification::Certificate { .. } => "certificate",
      Notification::Delete { .. } => "delete",
    };

    match tokio::time::timeout(DELIVERY_TIMEOUT, self.try_deliver(notification)).await {
      Ok(Ok(())) => tracing::debug!(kind, "notification delivered"),
      Ok(Err(e)) => tracing::error!(kind, error = %e, "notification failed"),
      Err(_) => tracing::error!(kind, "notification timed out"),
    }
  }

  async fn try_deliver(&self, notification: Notification) -> Result<(), BoxError> {
    match notification {
      Notification::Message { user_id, message } => {
        self.messenger.send(user_id, message).await?;
      }

      Notification::ChallengePrompt { user_id, previous, message } => {
        let sent = self.messenger.send(user_id, message).await?;
        self.store.set_last_challenge_message(user_id, sent).await?;
        if let Some(previous) = previous {
          // The old prompt may already be gone; that is not worth a retry.
          if let Err(e) = self.messenger.delete(&previous).await {
            tracing::warn!(user_id, message_id = %previous, error = %e, "could not delete old prompt");
          }
        }
      }

      Notification::Certificate { user_id, mut message, image } => {
        if let Some(path) = image {
          match self.messenger.upload_image(&path).await {
            Ok(reference) => message.image = Some(reference),
            Err(e) => {
              tracing::warn!(user_id, path = %path.display(), error = %e, "certificate image upload failed");
            }
          }
        }
        self.messenger.send(user_id, message).await?;
      }

      Notification::Delete { message_id } => {
        self.messenger.delete(&message_id).await?;
      }
    }
    Ok(())
  }
}
