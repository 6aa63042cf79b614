//! Trend analysis over a user's recent score history.
//!
//! Pure functions of the records passed in; nothing here is stored.

use std::collections::HashSet;

use crate::config::TetherCfg;
use crate::types::{DependencyScoreRecord, TrendDirection, TrendRecommendation, TrendSummary};

/// Current score at which a rising trend escalates boundaries.
const ESCALATE_SCORE: f32 = 50.0;
/// Current score at which a rising trend increases reminders.
const REMIND_SCORE: f32 = 30.0;

/// Least-squares slope of `scores` against their index, in points per record.
/// Zero for fewer than two samples.
pub fn slope(scores: &[f32]) -> f32 {
    let n = scores.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f32 / 2.0;
    let y_mean = scores.iter().sum::<f32>() / n as f32;
    let (num, den) = scores.iter().enumerate().fold((0.0f32, 0.0f32), |(num, den), (i, y)| {
        let dx = i as f32 - x_mean;
        (num + dx * (y - y_mean), den + dx * dx)
    });
    if den == 0.0 { 0.0 } else { num / den }
}

pub fn classify(slope: f32, threshold: f32) -> TrendDirection {
    if slope >= threshold {
        TrendDirection::Rising
    } else if slope <= -threshold {
        TrendDirection::Falling
    } else {
        TrendDirection::Stable
    }
}

fn recommend(current: f32, direction: TrendDirection, cfg: &TetherCfg) -> TrendRecommendation {
    let rising = direction == TrendDirection::Rising;
    if current >= cfg.high_threshold {
        TrendRecommendation::ImmediateIntervention
    } else if rising && current >= ESCALATE_SCORE {
        TrendRecommendation::EscalateBoundaries
    } else if rising && current >= REMIND_SCORE {
        TrendRecommendation::IncreaseReminders
    } else if direction == TrendDirection::Falling {
        TrendRecommendation::MaintainApproach
    } else {
        TrendRecommendation::ContinueMonitoring
    }
}

/// Summarise `records` (oldest first). Callers pass the look-back slice.
pub fn analyze(records: &[DependencyScoreRecord], cfg: &TetherCfg) -> TrendSummary {
    let scores: Vec<f32> = records.iter().map(|r| r.composite).collect();
    let current = scores.last().copied().unwrap_or(0.0);
    let mean = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };
    let peak = scores.iter().copied().fold(0.0f32, f32::max);
    let sessions_spanned = records
        .iter()
        .map(|r| r.session_id.as_str())
        .collect::<HashSet<_>>()
        .len();

    let insufficient_data = scores.len() < 2;
    let slope = slope(&scores);
    let direction = if insufficient_data {
        TrendDirection::Stable
    } else {
        classify(slope, cfg.trend_slope_threshold)
    };

    TrendSummary {
        direction,
        slope,
        current,
        mean,
        peak,
        records_analyzed: scores.len(),
        sessions_spanned,
        insufficient_data,
        recommendation: recommend(current, direction, cfg),
    }
}
