//! `barrierfree` server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) and the
//! `BARRIERFREE_*` environment, opens the SQLite store and the ranking
//! cache, then runs the mini-app API, the bot update poller, the outbox
//! dispatcher and the scheduled jobs side by side.
//!
//! ```text
//! barrierfree serve
//! barrierfree import catalog.json
//! ```

mod bot;
mod config;
mod import;
mod scheduler;
mod updates;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use barrierfree_api::{AppState, AuthConfig};
use barrierfree_cache::{MemoryCache, RedisCache};
use barrierfree_core::{
  Engine,
  cache::RankingCache,
  engine::GameSettings,
  outbox::{Dispatcher, Outbox},
};
use barrierfree_store_sqlite::SqliteStore;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{bot::BotClient, config::ServerConfig};

/// Upper bound on an ordinary bot API call.
const BOT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(author, version, about = "Barrier-Free challenge game server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Run the API, the bot and the scheduled jobs (default).
  Serve,
  /// Upsert challenges and mailings from a JSON catalog file.
  Import { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = ServerConfig::load(&cli.config)?;

  let store_path = config::expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command.unwrap_or(Command::Serve) {
    Command::Import { file } => {
      let catalog = import::read_catalog(&file).await?;
      let summary = import::import(&store, catalog).await?;
      println!(
        "imported {} challenges and {} mailings",
        summary.challenges, summary.mailings
      );
      Ok(())
    }

    Command::Serve => match cfg.redis_url.clone() {
      Some(url) => {
        let cache = RedisCache::connect(&url)
          .await
          .with_context(|| format!("failed to connect to redis at {url}"))?;
        serve(cfg, store, cache).await
      }
      None => {
        tracing::warn!("no redis_url configured; ranking cache is kept in memory");
        serve(cfg, store, MemoryCache::new()).await
      }
    },
  }
}

async fn serve<C>(cfg: ServerConfig, store: SqliteStore, cache: C) -> anyhow::Result<()>
where
  C: RankingCache + 'static,
{
  let daily_at = cfg.daily_job_time()?;
  let clock = cfg.game_clock()?;
  let store = Arc::new(store);
  let bot = BotClient::new(&cfg.bot_api_url, &cfg.bot_token, BOT_TIMEOUT)
    .context("failed to build bot client")?;

  let (outbox, rx) = Outbox::channel();
  let engine = Engine::new(
    Arc::clone(&store),
    Arc::new(cache),
    outbox,
    clock,
    GameSettings {
      app_link:          cfg.app_link.clone(),
      certificate_image: cfg.certificate_image.as_deref().map(config::expand_tilde),
    },
  );

  let cancel = CancellationToken::new();
  let dispatcher = tokio::spawn(Dispatcher::new(Arc::new(bot.clone()), store).run(rx));
  let workers = vec![
    tokio::spawn(updates::run(
      bot,
      engine.clone(),
      Duration::from_secs(cfg.poll_timeout_secs),
      cancel.clone(),
    )),
    tokio::spawn(scheduler::run_daily(engine.clone(), daily_at, cancel.clone())),
    tokio::spawn(scheduler::run_mailings(engine.clone(), cfg.mailing_interval(), cancel.clone())),
  ];

  let state = AppState {
    engine,
    auth: Arc::new(AuthConfig {
      bot_token: cfg.bot_token.clone(),
      max_age:   cfg.init_data_max_age(),
    }),
  };
  let app = barrierfree_api::router(state);
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal(cancel.clone()))
    .await
    .context("server error")?;

  // Stop the workers; once their engine handles are gone the dispatcher
  // drains what is left in the outbox and exits.
  cancel.cancel();
  for worker in workers {
    if let Err(e) = worker.await {
      tracing::error!(error = %e, "background task panicked");
    }
  }
  if let Err(e) = dispatcher.await {
    tracing::error!(error = %e, "outbox dispatcher panicked");
  }
  Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
  tokio::select! {
    _ = cancel.cancelled() => {}
    res = tokio::signal::ctrl_c() => {
      if let Err(e) = res {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
      }
      tracing::info!("shutdown requested");
    }
  }
}
