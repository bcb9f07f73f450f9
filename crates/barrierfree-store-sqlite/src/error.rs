//! Error type for `barrierfree-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A progression write named a user that does not exist.
  #[error("user not found: {0}")]
  UserNotFound(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
