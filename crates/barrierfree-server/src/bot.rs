//! HTTP client for the messaging platform's bot API.
//!
//! Implements [`Messenger`] for the outbox dispatcher and exposes the
//! long-polling `GET /updates` call used by [`crate::updates`].

use std::{path::Path, time::Duration};

use barrierfree_core::messenger::{Button, Messenger, OutgoingMessage};
use reqwest::{Client, Method, RequestBuilder, multipart};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;

use crate::updates::UpdateBatch;

#[derive(Debug, Error)]
pub enum BotError {
  #[error("bot api request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("bot api {endpoint} → {status}: {body}")]
  Status {
    endpoint: &'static str,
    status:   reqwest::StatusCode,
    body:     String,
  },

  #[error("could not read {path}: {source}")]
  Io {
    path:   String,
    #[source]
    source: std::io::Error,
  },

  #[error("unexpected bot api response: {0}")]
  Response(String),
}

pub type Result<T, E = BotError> = std::result::Result<T, E>;

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct NewMessageBody {
  text:        String,
  format:      &'static str,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  attachments: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SendMessageResult {
  message: SentMessage,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
  body: SentBody,
}

#[derive(Debug, Deserialize)]
struct SentBody {
  mid: String,
}

#[derive(Debug, Deserialize)]
struct UploadEndpoint {
  url: String,
}

/// Render buttons as one inline keyboard, one button per row.
fn keyboard(buttons: &[Button]) -> Value {
  let rows: Vec<Value> = buttons
    .iter()
    .map(|b| match b {
      Button::Callback { text, payload } => {
        json!([{ "type": "callback", "text": text, "payload": payload }])
      }
      Button::Link { text, url } => json!([{ "type": "link", "text": text, "url": url }]),
    })
    .collect();
  json!({ "type": "inline_keyboard", "payload": { "buttons": rows } })
}

fn message_body(message: OutgoingMessage) -> NewMessageBody {
  let mut attachments = vec![];
  if let Some(image) = message.image {
    attachments.push(json!({ "type": "image", "payload": { "token": image } }));
  }
  if !message.buttons.is_empty() {
    attachments.push(keyboard(&message.buttons));
  }
  NewMessageBody { text: message.text, format: "html", attachments }
}

/// Pull the first upload token out of an image upload reply.
///
/// Replies look like `{"photos": {"<key>": {"token": "…"}}}`; a bare
/// `{"token": "…"}` is accepted as well.
fn upload_token(reply: &Value) -> Option<String> {
  if let Some(token) = reply.get("token").and_then(Value::as_str) {
    return Some(token.to_owned());
  }
  reply
    .get("photos")?
    .as_object()?
    .values()
    .find_map(|p| p.get("token").and_then(Value::as_str))
    .map(str::to_owned)
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Bot API client. Cheap to clone; the inner [`reqwest::Client`] is
/// `Arc`-based.
#[derive(Clone)]
pub struct BotClient {
  client:   Client,
  base_url: String,
  token:    String,
}

impl BotClient {
  /// `timeout` bounds ordinary calls; long polls add their own wait on top.
  pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_owned(),
      token: token.to_owned(),
    })
  }

  fn request(&self, method: Method, path: &str) -> RequestBuilder {
    self
      .client
      .request(method, format!("{}{}", self.base_url, path))
      .query(&[("access_token", &self.token)])
  }

  async fn expect_json<T: DeserializeOwned>(
    endpoint: &'static str,
    resp: reqwest::Response,
  ) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(BotError::Status { endpoint, status, body });
    }
    Ok(resp.json().await?)
  }

  /// `GET /updates`: wait up to `timeout` for new updates after `marker`.
  pub async fn get_updates(&self, marker: Option<i64>, timeout: Duration) -> Result<UpdateBatch> {
    let mut req = self
      .request(Method::GET, "/updates")
      .query(&[("timeout", timeout.as_secs())])
      .query(&[("types", "message_created,message_callback")])
      .timeout(timeout + Duration::from_secs(10));
    if let Some(marker) = marker {
      req = req.query(&[("marker", marker)]);
    }
    Self::expect_json("GET /updates", req.send().await?).await
  }
}

impl Messenger for BotClient {
  type Error = BotError;

  /// `POST /messages?user_id=<id>`
  async fn send(&self, user_id: i64, message: OutgoingMessage) -> Result<Option<String>> {
    let resp = self
      .request(Method::POST, "/messages")
      .query(&[("user_id", user_id)])
      .json(&message_body(message))
      .send()
      .await?;
    let sent: SendMessageResult = Self::expect_json("POST /messages", resp).await?;
    Ok(Some(sent.message.body.mid))
  }

  /// `DELETE /messages?message_id=<mid>`
  async fn delete(&self, message_id: &str) -> Result<()> {
    let resp = self
      .request(Method::DELETE, "/messages")
      .query(&[("message_id", message_id)])
      .send()
      .await?;
    let _: Value = Self::expect_json("DELETE /messages", resp).await?;
    Ok(())
  }

  /// `POST /uploads?type=image`, then a multipart upload to the returned URL.
  async fn upload_image(&self, path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await.map_err(|source| BotError::Io {
      path: path.display().to_string(),
      source,
    })?;
    let file_name = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "image".to_owned());

    let resp = self
      .request(Method::POST, "/uploads")
      .query(&[("type", "image")])
      .send()
      .await?;
    let endpoint: UploadEndpoint = Self::expect_json("POST /uploads", resp).await?;

    let form = multipart::Form::new().part("data", multipart::Part::bytes(bytes).file_name(file_name));
    let resp = self.client.post(&endpoint.url).multipart(form).send().await?;
    let reply: Value = Self::expect_json("image upload", resp).await?;

    upload_token(&reply).ok_or_else(|| BotError::Response(format!("no upload token in {reply}")))
  }
}
