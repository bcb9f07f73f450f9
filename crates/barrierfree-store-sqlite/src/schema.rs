//! SQL schema for the Barrier-Free SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Ids come from the messaging platform.
CREATE TABLE IF NOT EXISTS users (
    id                        INTEGER PRIMARY KEY,
    created_at                TEXT    NOT NULL,   -- RFC 3339 UTC
    name                      TEXT    NOT NULL,
    username                  TEXT,
    avatar_url                TEXT,
    average_score             REAL    NOT NULL DEFAULT 0,
    average_revision          INTEGER NOT NULL DEFAULT 0,   -- cache revision of average_score
    last_completed_at         TEXT,
    current_challenge_id      TEXT    REFERENCES challenges(id),
    last_challenge_message_id TEXT,
    received_certificate      INTEGER NOT NULL DEFAULT 0
);

-- Catalog order is insertion order (rowid).
CREATE TABLE IF NOT EXISTS challenges (
    id           TEXT NOT NULL UNIQUE,
    name         TEXT NOT NULL,
    description  TEXT NOT NULL,
    scene_width  REAL NOT NULL,
    scene_height REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS challenge_elements (
    challenge_id TEXT    NOT NULL REFERENCES challenges(id) ON DELETE CASCADE,
    position     INTEGER NOT NULL,
    id           TEXT    NOT NULL,
    name         TEXT    NOT NULL,
    width        REAL    NOT NULL,
    target_x     REAL    NOT NULL,
    target_y     REAL    NOT NULL,
    PRIMARY KEY (challenge_id, id)
);

CREATE TABLE IF NOT EXISTS mailings (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    send_at      TEXT NOT NULL,
    message_text TEXT NOT NULL,
    button_text  TEXT NOT NULL,
    button_url   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS mailings_send_at_idx ON mailings(send_at);

PRAGMA user_version = 1;
";
