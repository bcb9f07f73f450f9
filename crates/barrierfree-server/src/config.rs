//! Server configuration, read from `config.toml` and `BARRIERFREE_*`
//! environment variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use barrierfree_core::progression::GameClock;
use chrono::NaiveTime;
use serde::Deserialize;

/// Top-level configuration for the `barrierfree` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                   String,
  #[serde(default = "default_port")]
  pub port:                   u16,
  /// Bot token; also the secret InitData tokens are signed with.
  pub bot_token:              String,
  #[serde(default = "default_bot_api_url")]
  pub bot_api_url:            String,
  /// Link that opens the mini-app.
  pub app_link:               String,
  #[serde(default = "default_store_path")]
  pub store_path:             PathBuf,
  /// Without it the ranking cache lives in process memory.
  #[serde(default)]
  pub redis_url:              Option<String>,
  #[serde(default = "default_utc_offset_hours")]
  pub utc_offset_hours:       i32,
  #[serde(default = "default_daily_job_hour")]
  pub daily_job_hour:         u32,
  #[serde(default)]
  pub daily_job_minute:       u32,
  #[serde(default = "default_mailing_interval_secs")]
  pub mailing_interval_secs:  u64,
  /// `0` disables the check.
  #[serde(default = "default_init_data_max_age_secs")]
  pub init_data_max_age_secs: u64,
  #[serde(default)]
  pub certificate_image:      Option<PathBuf>,
  #[serde(default = "default_poll_timeout_secs")]
  pub poll_timeout_secs:      u64,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 8080 }
fn default_bot_api_url() -> String { "https://platform-api.max.ru".into() }
fn default_store_path() -> PathBuf { PathBuf::from("barrierfree.db") }
fn default_utc_offset_hours() -> i32 { 3 }
fn default_daily_job_hour() -> u32 { 10 }
fn default_mailing_interval_secs() -> u64 { 60 }
fn default_init_data_max_age_secs() -> u64 { 86_400 }
fn default_poll_timeout_secs() -> u64 { 30 }

impl ServerConfig {
  /// Layer the optional TOML file at `path` under the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("BARRIERFREE"))
      .build()
      .context("failed to read config file")?;

    settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }

  /// Local wall-clock time of the daily progression job.
  pub fn daily_job_time(&self) -> anyhow::Result<NaiveTime> {
    NaiveTime::from_hms_opt(self.daily_job_hour, self.daily_job_minute, 0).with_context(|| {
      format!(
        "invalid daily job time {}:{:02}",
        self.daily_job_hour, self.daily_job_minute
      )
    })
  }

  /// The game timezone. Offsets of a day or more are rejected rather than
  /// read as UTC, since they would silently shift every cooldown day.
  pub fn game_clock(&self) -> anyhow::Result<GameClock> {
    GameClock::from_utc_offset_hours(self.utc_offset_hours).with_context(|| {
      format!(
        "invalid utc_offset_hours {}: must be between -23 and 23",
        self.utc_offset_hours
      )
    })
  }

  pub fn init_data_max_age(&self) -> Option<Duration> {
    (self.init_data_max_age_secs > 0).then(|| Duration::from_secs(self.init_data_max_age_secs))
  }

  pub fn mailing_interval(&self) -> Duration {
    Duration::from_secs(self.mailing_interval_secs.max(1))
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
