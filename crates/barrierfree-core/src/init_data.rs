//! InitData, the signed envelope the mini-app sends with every API call.
//!
//! The token is a query string signed by the messaging platform:
//!
//! 1. the signing key is `HMAC-SHA256(key = "WebAppData", msg = bot_token)`;
//! 2. the check string is every field except `hash`, sorted by key, rendered
//!    as `key=value` and joined with `\n` (nested objects as compact JSON);
//! 3. `hash` is the hex HMAC-SHA256 of the check string under that key.
//!
//! Parsing and verification are pure functions of `(token, bot_token)`.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Fixed label used as the HMAC key when deriving the signing key.
const SECRET_LABEL: &[u8] = b"WebAppData";

// ─── Envelope ────────────────────────────────────────────────────────────────

/// The `user` claim embedded in the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitDataUser {
  pub id:            i64,
  pub first_name:    String,
  #[serde(default)]
  pub last_name:     Option<String>,
  #[serde(default)]
  pub username:      Option<String>,
  #[serde(default)]
  pub language_code: Option<String>,
  #[serde(default)]
  pub photo_url:     Option<String>,
}

/// The `chat` claim embedded in the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitDataChat {
  pub id:   i64,
  #[serde(rename = "type")]
  pub kind: String,
}

/// A parsed InitData token. Only trust it once [`validate`] has passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
  pub auth_date: i64,
  pub query_id:  String,
  pub user:      Option<InitDataUser>,
  pub chat:      Option<InitDataChat>,
  pub ip:        Option<String>,
  pub hash:      String,
  /// Top-level fields this type does not model. They are still signed.
  pub extra:     BTreeMap<String, String>,
}

impl InitData {
  /// Reject envelopes signed longer than `max_age` before `now`.
  pub fn check_freshness(&self, now: DateTime<Utc>, max_age: Duration) -> Result<()> {
    let age = now.timestamp().saturating_sub(self.auth_date);
    if age > i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX) {
      return Err(Error::InitDataExpired { auth_date: self.auth_date });
    }
    Ok(())
  }

  /// Render the envelope back into a query-string token.
  ///
  /// Nested objects are JSON-encoded and percent-encoded once.
  pub fn encode(&self) -> Result<String> {
    let mut pairs = self.unsigned_pairs()?;
    pairs.push(("hash".to_owned(), self.hash.clone()));
    Ok(
      pairs
        .iter()
        .map(|(k, v)| {
          format!(
            "{}={}",
            utf8_percent_encode(k, NON_ALPHANUMERIC),
            utf8_percent_encode(v, NON_ALPHANUMERIC),
          )
        })
        .collect::<Vec<_>>()
        .join("&"),
    )
  }

  /// Every signed field as `(key, rendered value)`, sorted by key.
  fn unsigned_pairs(&self) -> Result<Vec<(String, String)>> {
    let mut fields: BTreeMap<String, String> = self.extra.clone();
    fields.insert("auth_date".to_owned(), self.auth_date.to_string());
    fields.insert("query_id".to_owned(), self.query_id.clone());
    if let Some(ip) = &self.ip {
      fields.insert("ip".to_owned(), ip.clone());
    }
    if let Some(user) = &self.user {
      fields.insert("user".to_owned(), to_compact_json(user)?);
    }
    if let Some(chat) = &self.chat {
      fields.insert("chat".to_owned(), to_compact_json(chat)?);
    }
    fields.remove("hash");
    Ok(fields.into_iter().collect())
  }

  /// The newline-joined `key=value` string the signature covers.
  pub fn check_string(&self) -> Result<String> {
    Ok(
      self
        .unsigned_pairs()?
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n"),
    )
  }
}

fn to_compact_json(value: &impl Serialize) -> Result<String> {
  serde_json::to_string(value).map_err(|e| Error::MalformedInput(e.to_string()))
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// Decode one `application/x-www-form-urlencoded` component.
fn form_decode(raw: &str) -> Result<String> {
  let spaced = raw.replace('+', " ");
  percent_decode_str(&spaced)
    .decode_utf8()
    .map(|s| s.into_owned())
    .map_err(|e| Error::MalformedInput(format!("invalid utf-8 in {raw:?}: {e}")))
}

/// Split the token into decoded top-level fields.
///
/// Parsing is strict: an empty segment, a segment without `=`, or a repeated
/// key is an error. Segments with an empty value are dropped.
fn parse_fields(token: &str) -> Result<BTreeMap<String, String>> {
  let mut fields = BTreeMap::new();
  for pair in token.split('&') {
    let (raw_key, raw_value) = pair
      .split_once('=')
      .ok_or_else(|| Error::MalformedInput(format!("bad query field: {pair:?}")))?;

    let key   = form_decode(raw_key)?;
    let value = form_decode(raw_value)?;
    if value.is_empty() {
      continue;
    }
    if fields.contains_key(&key) {
      return Err(Error::MalformedInput(format!("duplicate key: {key:?}")));
    }
    fields.insert(key, value);
  }
  Ok(fields)
}

/// Nested objects arrive percent-encoded once more inside the query value.
fn parse_nested<T: for<'de> Deserialize<'de>>(key: &str, value: &str) -> Result<T> {
  let decoded = percent_decode_str(value)
    .decode_utf8()
    .map_err(|e| Error::MalformedInput(format!("invalid utf-8 in {key}: {e}")))?;
  serde_json::from_str(&decoded)
    .map_err(|e| Error::MalformedInput(format!("invalid {key} json: {e}")))
}

fn required(fields: &mut BTreeMap<String, String>, key: &str) -> Result<String> {
  fields
    .remove(key)
    .ok_or_else(|| Error::MalformedInput(format!("missing field: {key}")))
}

/// Parse a token without checking its signature.
pub fn parse(token: &str) -> Result<InitData> {
  let mut fields = parse_fields(token)?;

  let user = fields
    .remove("user")
    .map(|v| parse_nested::<InitDataUser>("user", &v))
    .transpose()?;
  let chat = fields
    .remove("chat")
    .map(|v| parse_nested::<InitDataChat>("chat", &v))
    .transpose()?;

  let auth_date = required(&mut fields, "auth_date")?;
  let auth_date = auth_date
    .parse::<i64>()
    .map_err(|_| Error::MalformedInput(format!("auth_date is not an integer: {auth_date:?}")))?;
  let query_id = required(&mut fields, "query_id")?;
  let hash     = required(&mut fields, "hash")?;
  let ip       = fields.remove("ip");

  Ok(InitData { auth_date, query_id, user, chat, ip, hash, extra: fields })
}

// ─── Signing ─────────────────────────────────────────────────────────────────

fn signing_key(bot_token: &str) -> Vec<u8> {
  let mut mac =
    HmacSha256::new_from_slice(SECRET_LABEL).expect("HMAC accepts any key length");
  mac.update(bot_token.as_bytes());
  mac.finalize().into_bytes().to_vec()
}

fn check_mac(init_data: &InitData, bot_token: &str) -> Result<HmacSha256> {
  let mut mac = HmacSha256::new_from_slice(&signing_key(bot_token))
    .expect("HMAC accepts any key length");
  mac.update(init_data.check_string()?.as_bytes());
  Ok(mac)
}

/// Compute the hex signature the platform would attach to `init_data`.
pub fn sign(init_data: &InitData, bot_token: &str) -> Result<String> {
  Ok(hex::encode(check_mac(init_data, bot_token)?.finalize().into_bytes()))
}

/// Verify the `hash` of an already-parsed envelope in constant time.
pub fn validate(init_data: &InitData, bot_token: &str) -> Result<()> {
  let expected = hex::decode(&init_data.hash).map_err(|_| Error::SignatureMismatch)?;
  check_mac(init_data, bot_token)?
    .verify_slice(&expected)
    .map_err(|_| Error::SignatureMismatch)
}

/// Parse and verify a token in one step.
pub fn authenticate(token: &str, bot_token: &str) -> Result<InitData> {
  let init_data = parse(token)?;
  validate(&init_data, bot_token)?;
  Ok(init_data)
}
