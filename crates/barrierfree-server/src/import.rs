//! `barrierfree import`: provision the challenge catalog and mailings from
//! a JSON file.
//!
//! ```json
//! {
//!   "challenges": [
//!     { "id": "park", "name": "City park", "description": "…",
//!       "scene_width": 800, "scene_height": 600,
//!       "elements": [{ "id": "ramp", "name": "Ramp", "width": 64,
//!                      "target_x": 120, "target_y": 340 }] }
//!   ],
//!   "mailings": [
//!     { "send_at": "2025-03-08T09:00:00Z", "message_text": "…",
//!       "button_text": "Open", "button_url": "https://…" }
//!   ]
//! }
//! ```
//!
//! Challenges are upserted in file order, which is also the order they are
//! handed out in. Mailings are always added as new rows.

use std::path::Path;

use anyhow::Context as _;
use barrierfree_core::{
  model::{Challenge, NewMailing},
  store::ProgressStore,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CatalogFile {
  #[serde(default)]
  pub challenges: Vec<Challenge>,
  #[serde(default)]
  pub mailings:   Vec<NewMailing>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
  pub challenges: usize,
  pub mailings:   usize,
}

pub async fn read_catalog(path: &Path) -> anyhow::Result<CatalogFile> {
  let raw = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read {}", path.display()))?;
  serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub async fn import<S: ProgressStore>(store: &S, catalog: CatalogFile) -> anyhow::Result<ImportSummary> {
  let summary = ImportSummary {
    challenges: catalog.challenges.len(),
    mailings:   catalog.mailings.len(),
  };

  for challenge in catalog.challenges {
    let id = challenge.id.clone();
    store
      .upsert_challenge(challenge)
      .await
      .with_context(|| format!("failed to import challenge {id:?}"))?;
  }
  for mailing in catalog.mailings {
    store.add_mailing(mailing).await.context("failed to import mailing")?;
  }

  tracing::info!(
    challenges = summary.challenges,
    mailings = summary.mailings,
    "catalog imported"
  );
  Ok(summary)
}
