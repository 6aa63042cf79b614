use chrono::{DateTime, NaiveDate, Utc};

use crate::config::TetherCfg;
use crate::extract;
use crate::scoring::window::SessionWindow;
use crate::types::{
    COMPOSITE_MAX, CrisisSignal, DependencyScoreRecord, HistoryWindow, InteractionEvent,
    SubScoreSet,
};

/// Weighted composite of the four behavioural/lexical factors.
/// The crisis sub-score is deliberately absent.
pub fn composite(subscores: &SubScoreSet, cfg: &TetherCfg) -> f32 {
    let raw = cfg.w_frequency * subscores.frequency
        + cfg.w_duration * subscores.duration
        + cfg.w_emotional * subscores.emotional_dependency
        + cfg.w_isolation * subscores.isolation;
    raw.clamp(0.0, COMPOSITE_MAX)
}

/// Per-user append-only score history plus the daily interaction counter.
#[derive(Debug, Default)]
pub struct UserLedger {
    records: Vec<DependencyScoreRecord>,
    day: Option<NaiveDate>,
    day_count: u32,
}

impl UserLedger {
    /// Count one interaction on the UTC day of `at` and return the running
    /// total for that day. A late event from an earlier day counts as that
    /// day's first and leaves the current day untouched.
    pub fn bump_daily(&mut self, at: DateTime<Utc>) -> u32 {
        let date = at.date_naive();
        match self.day {
            Some(day) if day == date => {
                self.day_count += 1;
                self.day_count
            }
            Some(day) if date < day => 1,
            _ => {
                self.day = Some(date);
                self.day_count = 1;
                1
            }
        }
    }

    fn append(&mut self, record: DependencyScoreRecord) {
        self.records.push(record);
    }

    /// Oldest-to-newest slice selected by `window`.
    pub fn history(&self, window: HistoryWindow) -> Vec<DependencyScoreRecord> {
        match window {
            HistoryWindow::All => self.records.clone(),
            HistoryWindow::Last(n) => self.recent(n).to_vec(),
            HistoryWindow::Since(t) => {
                self.records.iter().filter(|r| r.timestamp >= t).cloned().collect()
            }
        }
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[DependencyScoreRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }
}

/// Output of one aggregation step.
#[derive(Debug, Clone)]
pub struct Scored {
    pub record: DependencyScoreRecord,
    pub crisis: CrisisSignal,
}

/// Run extraction for `event`, fold it into `window`, append the record to
/// `ledger`. Never fails: bad text just scores 0.
pub fn ingest(
    event: &InteractionEvent,
    window: &mut SessionWindow,
    ledger: &mut UserLedger,
    cfg: &TetherCfg,
) -> Scored {
    let daily = ledger.bump_daily(event.timestamp);
    window.observe(event, daily);

    let (subscores, crisis) = extract::extract(event, window, &cfg.lexicon);
    let composite = composite(&subscores, cfg);
    window.accumulate(&subscores, composite, crisis.flagged);

    let record = DependencyScoreRecord {
        user_id: event.user_id.clone(),
        session_id: event.session_id.clone(),
        composite,
        subscores,
        crisis: crisis.flagged,
        crisis_severity: crisis.severity,
        timestamp: event.timestamp,
    };
    ledger.append(record.clone());

    tracing::debug!(
        user_id = %event.user_id,
        session_id = %event.session_id,
        composite,
        frequency = subscores.frequency,
        duration = subscores.duration,
        emotional = subscores.emotional_dependency,
        isolation = subscores.isolation,
        crisis = crisis.flagged,
        "event scored"
    );

    Scored { record, crisis }
}
