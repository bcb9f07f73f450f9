//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings in UTC, so lexical order
//! matches chronological order.

use barrierfree_core::model::{Mailing, User};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const USER_COLUMNS: &str = "id, created_at, name, username, avatar_url, average_score, \
   last_completed_at, current_challenge_id, last_challenge_message_id, received_certificate";

/// Raw values read directly from a `users` row.
pub struct RawUser {
  pub id:                        i64,
  pub created_at:                String,
  pub name:                      String,
  pub username:                  Option<String>,
  pub avatar_url:                Option<String>,
  pub average_score:             f64,
  pub last_completed_at:         Option<String>,
  pub current_challenge_id:      Option<String>,
  pub last_challenge_message_id: Option<String>,
  pub received_certificate:      bool,
}

impl RawUser {
  /// Map a row selected with [`USER_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                        row.get(0)?,
      created_at:                row.get(1)?,
      name:                      row.get(2)?,
      username:                  row.get(3)?,
      avatar_url:                row.get(4)?,
      average_score:             row.get(5)?,
      last_completed_at:         row.get(6)?,
      current_challenge_id:      row.get(7)?,
      last_challenge_message_id: row.get(8)?,
      received_certificate:      row.get(9)?,
    })
  }

  pub fn into_user(self) -> Result<User> {
    Ok(User {
      id:                        self.id,
      created_at:                decode_dt(&self.created_at)?,
      name:                      self.name,
      username:                  self.username,
      avatar_url:                self.avatar_url,
      average_score:             self.average_score,
      last_completed_at:         self.last_completed_at.as_deref().map(decode_dt).transpose()?,
      current_challenge_id:      self.current_challenge_id,
      last_challenge_message_id: self.last_challenge_message_id,
      received_certificate:      self.received_certificate,
    })
  }
}

/// Raw values read directly from a `mailings` row.
pub struct RawMailing {
  pub id:           i64,
  pub send_at:      String,
  pub message_text: String,
  pub button_text:  String,
  pub button_url:   String,
}

impl RawMailing {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      send_at:      row.get(1)?,
      message_text: row.get(2)?,
      button_text:  row.get(3)?,
      button_url:   row.get(4)?,
    })
  }

  pub fn into_mailing(self) -> Result<Mailing> {
    Ok(Mailing {
      id:           self.id,
      send_at:      decode_dt(&self.send_at)?,
      message_text: self.message_text,
      button_text:  self.button_text,
      button_url:   self.button_url,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_sort_lexically() {
    let a = decode_dt("2025-03-01T09:00:00Z").unwrap();
    let b = decode_dt("2025-03-01T10:00:00.5+00:00").unwrap();
    assert!(encode_dt(a) < encode_dt(b));
    assert_eq!(decode_dt(&encode_dt(b)).unwrap(), b);
  }

  #[test]
  fn bad_timestamp_is_an_error() {
    assert!(matches!(decode_dt("yesterday"), Err(Error::DateParse(_))));
  }
}
