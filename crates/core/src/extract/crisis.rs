//! Crisis language detector.
//!
//! Runs beside the weighted factors, never inside them. Matching is plain
//! substring search over normalised text so that inflections and run-on
//! punctuation still hit; a false positive is recoverable, a miss is not.

use crate::lexicon::{LexiconSet, normalize};
use crate::types::CrisisSignal;

/// Detect crisis language in raw text.
pub fn detect(text: &str, lexicon: &LexiconSet) -> CrisisSignal {
    detect_normalized(&normalize(text), lexicon)
}

/// Detect on text already passed through [`normalize`]. The most severe
/// matching tier wins.
pub fn detect_normalized(normalized: &str, lexicon: &LexiconSet) -> CrisisSignal {
    if normalized.is_empty() {
        return CrisisSignal::none();
    }
    lexicon
        .crisis
        .iter()
        .filter(|p| normalized.contains(p.phrase.as_str()))
        .map(|p| p.severity)
        .max()
        .map(CrisisSignal::from_severity)
        .unwrap_or_default()
}
