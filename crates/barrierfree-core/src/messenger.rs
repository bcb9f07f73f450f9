//! The `Messenger` trait: outbound calls to the messaging platform.

use std::{future::Future, path::Path};

use serde::{Deserialize, Serialize};

/// An interactive element attached below a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Button {
  /// Sends `payload` back to the bot as a callback when pressed.
  Callback { text: String, payload: String },
  /// Opens `url`.
  Link { text: String, url: String },
}

impl Button {
  pub fn callback(text: impl Into<String>, payload: impl Into<String>) -> Self {
    Self::Callback { text: text.into(), payload: payload.into() }
  }

  pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
    Self::Link { text: text.into(), url: url.into() }
  }
}

/// A message to deliver to one user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutgoingMessage {
  /// HTML-formatted text.
  pub text:    String,
  pub buttons: Vec<Button>,
  /// Platform reference of an uploaded image to attach.
  pub image:   Option<String>,
}

impl OutgoingMessage {
  pub fn text(text: impl Into<String>) -> Self {
    Self { text: text.into(), ..Self::default() }
  }

  pub fn with_button(mut self, button: Button) -> Self {
    self.buttons.push(button);
    self
  }
}

/// Abstraction over the bot API of the messaging platform.
pub trait Messenger: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Deliver a message and return its platform id, if the platform reports
  /// one.
  fn send(
    &self,
    user_id: i64,
    message: OutgoingMessage,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  fn delete<'a>(
    &'a self,
    message_id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Upload an image file and return the reference to attach it with.
  fn upload_image<'a>(
    &'a self,
    path: &'a Path,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send + 'a;
}
