//! Background loops driving the daily progression job and the mailing
//! sweep. Both run until their [`CancellationToken`] fires.

use std::time::Duration;

use barrierfree_core::{Engine, cache::RankingCache, store::ProgressStore};
use chrono::{NaiveTime, Utc};
use tokio_util::sync::CancellationToken;

/// Run the daily progression job every day at `at`, local game time.
pub async fn run_daily<S, C>(engine: Engine<S, C>, at: NaiveTime, cancel: CancellationToken)
where
  S: ProgressStore,
  C: RankingCache,
{
  tracing::info!(at = %at, offset = %engine.clock.offset(), "daily progression scheduled");

  loop {
    let now  = Utc::now();
    let next = engine.clock.next_occurrence(now, at);
    let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
    tracing::debug!(next = %next, "next daily progression run");

    tokio::select! {
      _ = cancel.cancelled() => {
        tracing::info!("daily progression job stopping");
        break;
      }
      _ = tokio::time::sleep(wait) => {
        if let Err(e) = engine.run_daily_progression(Utc::now()).await {
          tracing::error!(error = %e, "daily progression failed");
        }
      }
    }
  }
}

/// Sweep due mailings every `period`.
pub async fn run_mailings<S, C>(engine: Engine<S, C>, period: Duration, cancel: CancellationToken)
where
  S: ProgressStore,
  C: RankingCache,
{
  tracing::info!(interval_secs = period.as_secs(), "mailing sweep started");
  let mut interval = tokio::time::interval(period);
  interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => {
        tracing::info!("mailing sweep stopping");
        break;
      }
      _ = interval.tick() => {
        match engine.run_mailing_sweep(Utc::now()).await {
          Ok(report) if report.delivered > 0 => {
            tracing::debug!(delivered = report.delivered, "mailings queued");
          }
          Ok(_) => {}
          Err(e) => tracing::error!(error = %e, "mailing sweep failed"),
        }
      }
    }
  }
}
