//! Feature extraction. Rule-based, no I/O.

pub mod crisis;
pub mod features;

use crate::lexicon::{LexiconSet, normalize};
use crate::scoring::window::SessionWindow;
use crate::types::{CrisisSignal, InteractionEvent, SubScoreSet};

/// Score one event against its session window. The text is normalised once
/// and shared by the lexical extractors and the crisis detector.
pub fn extract(
    event: &InteractionEvent,
    window: &SessionWindow,
    lexicon: &LexiconSet,
) -> (SubScoreSet, CrisisSignal) {
    let text = normalize(&event.text);
    let crisis = crisis::detect_normalized(&text, lexicon);

    let subscores = SubScoreSet {
        frequency: features::frequency(window),
        duration: features::duration(window),
        emotional_dependency: features::emotional_dependency(&text, lexicon),
        isolation: features::isolation(&text, lexicon),
        crisis: crisis.score,
    };
    (subscores, crisis)
}
