//! Error type for `barrierfree-cache`.

use bb8_redis::{bb8::RunError, redis::RedisError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("redis error: {0}")]
  Redis(#[from] RedisError),

  #[error("redis pool error: {0}")]
  Pool(#[from] RunError<RedisError>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
