//! [`Engine`]: the handles every game operation runs against.
//!
//! There is no process-wide registry: whoever needs the store, the cache or
//! the outbox receives an `Engine` (or a clone of it).

use std::{path::PathBuf, sync::Arc};

use crate::{
  cache::RankingCache,
  outbox::Outbox,
  progression::GameClock,
  store::ProgressStore,
};

/// Presentation settings the flows need.
#[derive(Debug, Clone, Default)]
pub struct GameSettings {
  /// Link that opens the mini-app inside the messenger.
  pub app_link:          String,
  /// Image attached to the final certificate message.
  pub certificate_image: Option<PathBuf>,
}

pub struct Engine<S, C> {
  pub store:    Arc<S>,
  pub cache:    Arc<C>,
  pub outbox:   Outbox,
  pub clock:    GameClock,
  pub settings: Arc<GameSettings>,
}

impl<S, C> Engine<S, C>
where
  S: ProgressStore,
  C: RankingCache,
{
  pub fn new(
    store: Arc<S>,
    cache: Arc<C>,
    outbox: Outbox,
    clock: GameClock,
    settings: GameSettings,
  ) -> Self {
    Self { store, cache, outbox, clock, settings: Arc::new(settings) }
  }
}

// Manual impl: a derive would demand `S: Clone` and `C: Clone`.
impl<S, C> Clone for Engine<S, C> {
  fn clone(&self) -> Self {
    Self {
      store:    Arc::clone(&self.store),
      cache:    Arc::clone(&self.cache),
      outbox:   self.outbox.clone(),
      clock:    self.clock,
      settings: Arc::clone(&self.settings),
    }
  }
}
