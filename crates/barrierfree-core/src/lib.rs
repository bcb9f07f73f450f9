//! Core types, rules and orchestration for the Barrier-Free challenge game.
//!
//! This crate is free of HTTP and database dependencies. The durable store,
//! the ranking cache and the messaging platform are reached through the
//! [`store::ProgressStore`], [`cache::RankingCache`] and
//! [`messenger::Messenger`] traits; concrete backends live in sibling crates.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod cache;
pub mod completion;
pub mod engine;
pub mod error;
pub mod flows;
pub mod init_data;
pub mod jobs;
pub mod messenger;
pub mod model;
pub mod outbox;
pub mod progression;
pub mod scoring;
pub mod store;

pub use engine::Engine;
pub use error::{Error, Result};

#[cfg(test)]
mod fakes;
