//! Error types for `barrierfree-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The InitData token or one of its nested JSON values could not be parsed.
  #[error("malformed init data: {0}")]
  MalformedInput(String),

  #[error("init data signature mismatch")]
  SignatureMismatch,

  #[error("init data expired (auth_date {auth_date})")]
  InitDataExpired { auth_date: i64 },

  #[error("init data carries no user")]
  MissingUserClaim,

  #[error("no user found for id {0}")]
  UnknownUser(i64),

  #[error("no current challenge available")]
  NoActiveChallenge,

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("cache error: {0}")]
  Cache(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub fn cache(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Cache(Box::new(e))
  }

  /// Whether this error means the caller could not be authenticated.
  pub fn is_authentication(&self) -> bool {
    matches!(
      self,
      Self::MalformedInput(_)
        | Self::SignatureMismatch
        | Self::InitDataExpired { .. }
        | Self::MissingUserClaim
        | Self::UnknownUser(_)
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
