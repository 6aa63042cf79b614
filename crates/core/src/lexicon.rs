//! Phrase lexicons for the text extractors.
//!
//! A `LexiconSet` bundles the emotional-dependency, isolation and crisis
//! phrase tables for one locale. Tables are data, not code: the built-in
//! English set can be replaced wholesale by a JSON document so another locale
//! can be dropped in without a rebuild.
//!
//! All matching happens on normalised text (see [`normalize`]), and phrases
//! are normalised the same way when a set is loaded.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{CrisisSeverity, EMOTIONAL_MAX, ISOLATION_MAX};

/// Per-match weight of the built-in emotional-dependency phrases.
const EMOTIONAL_WEIGHT: f32 = 5.0;
/// Per-match weight of the built-in isolation phrases.
const ISOLATION_WEIGHT: f32 = 7.0;

const EMOTIONAL_EN: &[&str] = &[
    "only you understand",
    "only one who understands",
    "nobody else",
    "you're my only friend",
    "can't live without",
    "don't know what i'd do without you",
    "save me",
    "desperate",
    "hopeless",
    "you're all i have",
    "need you",
    "depend on you",
];

const ISOLATION_EN: &[&str] = &[
    "no friends",
    "alone",
    "nobody cares",
    "isolated",
    "have no one",
    "can't talk to anyone",
    "no one understands",
    "nobody understands",
    "everybody left me",
    "completely alone",
    "no one else to talk to",
    "nobody to talk to",
    "only one i can talk to",
];

const HOPELESSNESS_EN: &[&str] = &[
    "hopeless",
    "give up",
    "giving up",
    "no point",
    "nothing matters",
    "can't take this anymore",
    "what's the point",
    "no way out",
];

const IDEATION_EN: &[&str] = &[
    "want to die",
    "wish i was dead",
    "wish i were dead",
    "better off dead",
    "end it all",
    "can't go on",
    "no point living",
    "nobody would miss me",
    "goodbye forever",
    "suicide",
    "suicidal",
    "don't want to be here anymore",
    "don't want to live",
];

const EXPLICIT_INTENT_EN: &[&str] = &[
    "kill myself",
    "going to kill",
    "end my life",
    "harm myself",
    "hurt myself",
    "hurting myself",
    "harming myself",
    "take my own life",
    "going to end it",
    "overdose",
];

/// Lowercase, drop apostrophes, turn every other non-alphanumeric run into a
/// single space. "Can't  go on..." and "cant go on" normalise identically.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else if matches!(ch, '\'' | '\u{2019}' | '`') {
            // contractions stay glued together
        } else {
            pending_space = true;
        }
    }
    out
}

/// A phrase with the points it adds on a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPhrase {
    pub phrase: String,
    pub weight: f32,
}

/// A crisis phrase and the tier it signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisPhrase {
    pub phrase: String,
    pub severity: CrisisSeverity,
}

/// The three phrase tables for one locale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconSet {
    pub locale: String,
    pub emotional: Vec<WeightedPhrase>,
    pub isolation: Vec<WeightedPhrase>,
    pub crisis: Vec<CrisisPhrase>,
}

impl LexiconSet {
    /// Built-in English tables.
    pub fn english() -> Self {
        let weighted = |list: &[&str], weight: f32| {
            list.iter()
                .map(|p| WeightedPhrase { phrase: normalize(p), weight })
                .collect::<Vec<_>>()
        };
        let tier = |list: &[&str], severity: CrisisSeverity| {
            list.iter()
                .map(move |p| CrisisPhrase { phrase: normalize(p), severity })
                .collect::<Vec<_>>()
        };

        let mut crisis = tier(HOPELESSNESS_EN, CrisisSeverity::Hopelessness);
        crisis.extend(tier(IDEATION_EN, CrisisSeverity::Ideation));
        crisis.extend(tier(EXPLICIT_INTENT_EN, CrisisSeverity::ExplicitIntent));

        Self {
            locale: "en".into(),
            emotional: weighted(EMOTIONAL_EN, EMOTIONAL_WEIGHT),
            isolation: weighted(ISOLATION_EN, ISOLATION_WEIGHT),
            crisis,
        }
    }

    /// Parse, normalise and validate a JSON lexicon document.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let raw: Self = serde_json::from_str(json)?;
        raw.prepared()
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Normalise every phrase in place, then validate.
    pub fn prepared(mut self) -> ConfigResult<Self> {
        for p in self.emotional.iter_mut().chain(self.isolation.iter_mut()) {
            p.phrase = normalize(&p.phrase);
        }
        for p in &mut self.crisis {
            p.phrase = normalize(&p.phrase);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let fail = |reason: String| ConfigError::Lexicon {
            locale: self.locale.clone(),
            reason,
        };

        if self.locale.trim().is_empty() {
            return Err(fail("locale must not be empty".into()));
        }
        // An empty crisis table would silently disable the safety fast-path.
        if self.crisis.is_empty() {
            return Err(fail("crisis table must not be empty".into()));
        }
        for (table, list, max) in [
            ("emotional", &self.emotional, EMOTIONAL_MAX),
            ("isolation", &self.isolation, ISOLATION_MAX),
        ] {
            for p in list {
                if p.phrase.is_empty() {
                    return Err(fail(format!("{table} table has an empty phrase")));
                }
                check_normalized(table, &p.phrase).map_err(fail)?;
                if !p.weight.is_finite() || p.weight <= 0.0 || p.weight > max {
                    return Err(fail(format!(
                        "{table} phrase {:?} weight must be in (0, {max}], got {}",
                        p.phrase, p.weight
                    )));
                }
            }
        }
        for p in &self.crisis {
            if p.phrase.is_empty() {
                return Err(fail(format!(
                    "crisis table has an empty {} phrase",
                    p.severity.as_str()
                )));
            }
            check_normalized("crisis", &p.phrase).map_err(fail)?;
        }
        Ok(())
    }
}

/// Input text is matched after [`normalize`], so a phrase that normalisation
/// would change can never match anything.
fn check_normalized(table: &str, phrase: &str) -> Result<(), String> {
    let expected = normalize(phrase);
    if phrase == expected {
        Ok(())
    } else {
        Err(format!(
            "{table} phrase {phrase:?} is not normalised (expected {expected:?}); use prepared()"
        ))
    }
}

impl Default for LexiconSet {
    fn default() -> Self {
        Self::english()
    }
}

/// Sum of weights of every distinct phrase present in `normalized`.
pub fn weighted_hits(phrases: &[WeightedPhrase], normalized: &str) -> f32 {
    phrases
        .iter()
        .filter(|p| normalized.contains(p.phrase.as_str()))
        .map(|p| p.weight)
        .sum()
}
