//! Behavioural and lexical sub-scores.
//!
//! Every function here is total: empty or garbage text scores 0 and nothing
//! returns an error.

use crate::lexicon::{self, LexiconSet};
use crate::scoring::window::SessionWindow;
use crate::types::{DURATION_MAX, EMOTIONAL_MAX, FREQUENCY_MAX, ISOLATION_MAX};

/// Points per interaction of the day.
const FREQUENCY_PER_INTERACTION: f32 = 2.0;
/// Points per minute of session time.
const DURATION_PER_MINUTE: f32 = 0.5;

/// Frequency score: `min(daily_count * 2, 30)`.
pub fn frequency(window: &SessionWindow) -> f32 {
    (window.daily_interactions() as f32 * FREQUENCY_PER_INTERACTION).clamp(0.0, FREQUENCY_MAX)
}

/// Duration score: `min(minutes * 0.5, 20)`.
pub fn duration(window: &SessionWindow) -> f32 {
    (window.duration_minutes() * DURATION_PER_MINUTE).clamp(0.0, DURATION_MAX)
}

/// Exclusive-reliance language, 0–25.
pub fn emotional_dependency(normalized: &str, lexicon: &LexiconSet) -> f32 {
    lexicon::weighted_hits(&lexicon.emotional, normalized).clamp(0.0, EMOTIONAL_MAX)
}

/// "No one else" language, 0–25.
pub fn isolation(normalized: &str, lexicon: &LexiconSet) -> f32 {
    lexicon::weighted_hits(&lexicon.isolation, normalized).clamp(0.0, ISOLATION_MAX)
}
