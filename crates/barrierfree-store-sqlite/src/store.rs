//! [`SqliteStore`]: the SQLite implementation of [`ProgressStore`].

use std::path::Path;

use barrierfree_core::{
  model::{Challenge, ChallengeElement, Mailing, NewMailing, NewUser, Player, User},
  store::{CompletionUpdate, ProgressStore},
};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};

use crate::{
  Error, Result,
  encode::{RawMailing, RawUser, USER_COLUMNS, encode_dt},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// The durable game store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn read_user(&self, id: i64) -> Result<Option<RawUser>> {
    let raw = self
      .conn
      .call(move |conn| {
        let raw = conn
          .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            rusqlite::params![id],
            RawUser::from_row,
          )
          .optional()?;
        Ok(raw)
      })
      .await?;
    Ok(raw)
  }
}

/// Load one challenge with its elements in scene order.
fn read_challenge(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Challenge>> {
  let head = conn
    .query_row(
      "SELECT id, name, description, scene_width, scene_height FROM challenges WHERE id = ?1",
      rusqlite::params![id],
      |r| {
        Ok(Challenge {
          id:           r.get(0)?,
          name:         r.get(1)?,
          description:  r.get(2)?,
          scene_width:  r.get(3)?,
          scene_height: r.get(4)?,
          elements:     vec![],
        })
      },
    )
    .optional()?;

  let Some(mut challenge) = head else {
    return Ok(None);
  };

  let mut stmt = conn.prepare(
    "SELECT id, name, width, target_x, target_y FROM challenge_elements
     WHERE challenge_id = ?1 ORDER BY position",
  )?;
  challenge.elements = stmt
    .query_map(rusqlite::params![id], |r| {
      Ok(ChallengeElement {
        id:       r.get(0)?,
        name:     r.get(1)?,
        width:    r.get(2)?,
        target_x: r.get(3)?,
        target_y: r.get(4)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(Some(challenge))
}

// ─── ProgressStore impl ──────────────────────────────────────────────────────

impl ProgressStore for SqliteStore {
  type Error = Error;

  // ── Users ─────────────────────────────────────────────────────────────────

  async fn get_or_create_user(&self, new: NewUser) -> Result<User> {
    let id = new.id;
    let created_at = encode_dt(Utc::now());

    let raw = self
      .conn
      .call(move |conn| {
        // The primary key decides the race between concurrent first contacts.
        conn.execute(
          "INSERT INTO users (id, created_at, name, username, avatar_url, average_score)
           VALUES (?1, ?2, ?3, ?4, ?5, 0.0)
           ON CONFLICT(id) DO NOTHING",
          rusqlite::params![new.id, created_at, new.name, new.username, new.avatar_url],
        )?;
        let raw = conn.query_row(
          &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
          rusqlite::params![new.id],
          RawUser::from_row,
        )?;
        Ok(raw)
      })
      .await?;

    let user = raw.into_user()?;
    tracing::debug!(user_id = id, "user loaded");
    Ok(user)
  }

  async fn get_user(&self, id: i64) -> Result<Option<User>> {
    self.read_user(id).await?.map(RawUser::into_user).transpose()
  }

  async fn load_player(&self, id: i64) -> Result<Option<Player>> {
    let Some(user) = self.get_user(id).await? else {
      return Ok(None);
    };

    let current_challenge = match user.current_challenge_id.clone() {
      Some(cid) => self.conn.call(move |conn| Ok(read_challenge(conn, &cid)?)).await?,
      None => None,
    };

    Ok(Some(Player { user, current_challenge }))
  }

  async fn list_users(&self) -> Result<Vec<User>> {
    let raws: Vec<RawUser> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let rows = stmt
          .query_map([], RawUser::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUser::into_user).collect()
  }

  // ── Progression writes ────────────────────────────────────────────────────

  async fn record_completion(&self, update: CompletionUpdate) -> Result<()> {
    let user_id = update.user_id;
    let completed_at = update.completed_at.map(encode_dt);

    let changed = self
      .conn
      .call(move |conn| {
        // The average only moves forward in cache revisions. The stamp is
        // only taken while the user is still on the scored challenge, and
        // never overwrites an earlier one.
        let changed = conn.execute(
          "UPDATE users SET
             average_score     = CASE
               WHEN ?5 > average_revision THEN ?2
               ELSE average_score
             END,
             average_revision  = MAX(average_revision, ?5),
             last_completed_at = CASE
               WHEN ?4 IS NOT NULL AND current_challenge_id = ?3
               THEN COALESCE(last_completed_at, ?4)
               ELSE last_completed_at
             END
           WHERE id = ?1",
          rusqlite::params![
            update.user_id,
            update.average_score,
            update.challenge_id,
            completed_at,
            update.average_revision
          ],
        )?;
        Ok(changed)
      })
      .await?;

    if changed == 0 {
      return Err(Error::UserNotFound(user_id));
    }
    Ok(())
  }

  async fn switch_challenge(
    &self,
    user_id: i64,
    expected: Option<&str>,
    next: &str,
  ) -> Result<bool> {
    let expected = expected.map(str::to_owned);
    let next = next.to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE users SET current_challenge_id = ?3, last_completed_at = NULL
           WHERE id = ?1 AND current_challenge_id IS ?2",
          rusqlite::params![user_id, expected, next],
        )?;
        Ok(changed)
      })
      .await?;

    Ok(changed == 1)
  }

  async fn set_last_challenge_message(
    &self,
    user_id: i64,
    message_id: Option<String>,
  ) -> Result<()> {
    let changed = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE users SET last_challenge_message_id = ?2 WHERE id = ?1",
          rusqlite::params![user_id, message_id],
        )?;
        Ok(changed)
      })
      .await?;

    if changed == 0 {
      return Err(Error::UserNotFound(user_id));
    }
    Ok(())
  }

  async fn mark_certificate_received(&self, user_id: i64) -> Result<bool> {
    let changed = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE users SET received_certificate = 1
           WHERE id = ?1 AND received_certificate = 0",
          rusqlite::params![user_id],
        )?;
        Ok(changed)
      })
      .await?;

    Ok(changed == 1)
  }

  // ── Catalog ───────────────────────────────────────────────────────────────

  async fn get_challenge(&self, id: &str) -> Result<Option<Challenge>> {
    let id = id.to_owned();
    let challenge = self
      .conn
      .call(move |conn| Ok(read_challenge(conn, &id)?))
      .await?;
    Ok(challenge)
  }

  async fn first_challenge_excluding(&self, completed: &[String]) -> Result<Option<Challenge>> {
    let completed = completed.to_vec();

    let challenge = self
      .conn
      .call(move |conn| {
        let ids: Vec<String> = conn
          .prepare("SELECT id FROM challenges ORDER BY rowid")?
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<_>>()?;

        match ids.into_iter().find(|id| !completed.contains(id)) {
          Some(id) => Ok(read_challenge(conn, &id)?),
          None => Ok(None),
        }
      })
      .await?;

    Ok(challenge)
  }

  async fn upsert_challenge(&self, challenge: Challenge) -> Result<()> {
    let id = challenge.id.clone();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // DO UPDATE keeps the rowid, and with it the catalog position.
        tx.execute(
          "INSERT INTO challenges (id, name, description, scene_width, scene_height)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(id) DO UPDATE SET
             name         = excluded.name,
             description  = excluded.description,
             scene_width  = excluded.scene_width,
             scene_height = excluded.scene_height",
          rusqlite::params![
            challenge.id,
            challenge.name,
            challenge.description,
            challenge.scene_width,
            challenge.scene_height
          ],
        )?;

        tx.execute(
          "DELETE FROM challenge_elements WHERE challenge_id = ?1",
          rusqlite::params![challenge.id],
        )?;
        for (position, el) in challenge.elements.iter().enumerate() {
          tx.execute(
            "INSERT INTO challenge_elements
               (challenge_id, position, id, name, width, target_x, target_y)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
              challenge.id,
              position as i64,
              el.id,
              el.name,
              el.width,
              el.target_x,
              el.target_y
            ],
          )?;
        }

        tx.commit()?;
        Ok(())
      })
      .await?;

    tracing::debug!(challenge_id = %id, "challenge upserted");
    Ok(())
  }

  // ── Mailings ──────────────────────────────────────────────────────────────

  async fn add_mailing(&self, mailing: NewMailing) -> Result<Mailing> {
    let send_at = encode_dt(mailing.send_at);
    let row = (
      send_at,
      mailing.message_text.clone(),
      mailing.button_text.clone(),
      mailing.button_url.clone(),
    );

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO mailings (send_at, message_text, button_text, button_url)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![row.0, row.1, row.2, row.3],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Mailing {
      id,
      send_at:      mailing.send_at,
      message_text: mailing.message_text,
      button_text:  mailing.button_text,
      button_url:   mailing.button_url,
    })
  }

  async fn due_mailings(&self, now: DateTime<Utc>) -> Result<Vec<Mailing>> {
    let now = encode_dt(now);

    let raws: Vec<RawMailing> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, send_at, message_text, button_text, button_url FROM mailings
           WHERE send_at <= ?1 ORDER BY send_at, id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![now], RawMailing::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMailing::into_mailing).collect()
  }
}
