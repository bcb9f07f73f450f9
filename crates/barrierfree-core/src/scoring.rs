//! Accuracy scoring of a submitted scene.
//!
//! The score is `1 - min(total_distance / MAX_ERROR, 1)` as a percentage with
//! one decimal, where `total_distance` is the sum of Manhattan distances
//! between each placed element and its target. Elements the user did not
//! place are left out of the sum.

use std::collections::HashMap;

use crate::model::{ChallengeElement, Placement};

/// Total distance at which the score bottoms out at zero. Kept constant
/// (not derived from the scene size) so scores stay comparable.
pub const MAX_ERROR: f64 = 1000.0;

/// Sum of `|Δx| + |Δy|` over every element that has a placement.
pub fn total_distance(elements: &[ChallengeElement], placements: &[Placement]) -> f64 {
  let placed: HashMap<&str, &Placement> =
    placements.iter().map(|p| (p.id.as_str(), p)).collect();

  elements
    .iter()
    .filter_map(|element| {
      placed.get(element.id.as_str()).map(|p| {
        (p.x - element.target_x).abs() + (p.y - element.target_y).abs()
      })
    })
    .sum()
}

/// Score a submission, 0.0–100.0 rounded to one decimal.
pub fn score(elements: &[ChallengeElement], placements: &[Placement]) -> f64 {
  let error_rate = (total_distance(elements, placements) / MAX_ERROR).min(1.0);
  round1((1.0 - error_rate).max(0.0) * 100.0)
}

/// Round to one decimal place, ties to even on the exact binary value.
///
/// Scores recorded before the move to this server were rounded that way, so
/// `99.25` (exact in binary) lands on `99.2`. `{:.1}` formatting is
/// correctly rounded; `f64::round` sends ties away from zero.
pub fn round1(value: f64) -> f64 {
  format!("{value:.1}").parse().unwrap_or(value)
}
