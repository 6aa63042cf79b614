//! Ingest and query surface.
//!
//! Sessions are independent units of work. Each one lives behind its own
//! mutex, so events for the same session are applied one at a time while
//! different sessions proceed in parallel. The shared maps are only touched
//! long enough to clone an `Arc`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::config::TetherCfg;
use crate::error::{ConfigResult, DeliveryWarning};
use crate::intervention::machine::{InterventionMachine, Reading};
use crate::intervention::{escalation, guidance};
use crate::io::outbox::{self, EscalationReceiver, Outbox, TelemetryReceiver};
use crate::scoring::aggregator::{self, UserLedger};
use crate::scoring::trend;
use crate::scoring::window::SessionWindow;
use crate::types::{
    BoundaryHealth, CloseReason, ClosedSession, DecisionEvent, DependencyScoreRecord, HistoryWindow,
    InteractionEvent, InterventionLevel, LevelTransition, SessionId, SessionSummary,
    TelemetryEvent, TrendSummary, UserId,
};

/// Mutable state of one open session.
#[derive(Debug)]
struct SessionState {
    window: SessionWindow,
    machine: InterventionMachine,
    /// Set once the session has been archived; late writers must reopen.
    closed: bool,
}

impl SessionState {
    fn open(event: &InteractionEvent) -> Self {
        tracing::debug!(
            user_id = %event.user_id,
            session_id = %event.session_id,
            "session opened"
        );
        Self {
            window: SessionWindow::open(event),
            machine: InterventionMachine::new(event.session_id.clone()),
            closed: false,
        }
    }

    fn summarize(&self, reason: CloseReason) -> SessionSummary {
        let w = &self.window;
        SessionSummary {
            session_id: w.session_id().to_string(),
            user_id: w.user_id().to_string(),
            reason,
            started_at: w.started_at(),
            ended_at: w.last_event_at(),
            event_count: w.interaction_count(),
            final_level: self.machine.level(),
            final_score: w.last_composite(),
            peak_score: w.peak_composite(),
            mean_subscores: w.mean_subscores(),
            crisis_seen: w.crisis_seen(),
            transition_count: self.machine.transitions().len(),
            health: BoundaryHealth::classify(w.peak_composite()),
        }
    }
}

/// Closed-session summaries kept in memory per user. Older ones are only
/// available from the telemetry sink.
pub const ARCHIVE_PER_USER: usize = 64;

type SessionSlot = Arc<Mutex<SessionState>>;
type LedgerSlot = Arc<Mutex<UserLedger>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // State is consistent between statements; a panicked writer leaves
    // nothing half-applied that a later reader could trip over.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The scoring engine.
pub struct Engine {
    cfg: Arc<TetherCfg>,
    outbox: Outbox,
    sessions: DashMap<SessionId, SessionSlot>,
    ledgers: DashMap<UserId, LedgerSlot>,
    archive: DashMap<UserId, VecDeque<SessionSummary>>,
}

impl Engine {
    /// Validate `cfg` and wire up both outbound channels.
    /// Returns (engine, escalation receiver, telemetry receiver).
    pub fn new(cfg: TetherCfg) -> ConfigResult<(Self, EscalationReceiver, TelemetryReceiver)> {
        cfg.validate()?;
        let (outbox, esc_rx, tel_rx) = outbox::channels(&cfg);
        Ok((Self::assemble(cfg, outbox), esc_rx, tel_rx))
    }

    /// Validate `cfg` and use a caller-supplied outbox.
    pub fn with_outbox(cfg: TetherCfg, outbox: Outbox) -> ConfigResult<Self> {
        cfg.validate()?;
        Ok(Self::assemble(cfg, outbox))
    }

    fn assemble(cfg: TetherCfg, outbox: Outbox) -> Self {
        Self {
            cfg: Arc::new(cfg),
            outbox,
            sessions: DashMap::new(),
            ledgers: DashMap::new(),
            archive: DashMap::new(),
        }
    }

    pub fn config(&self) -> &TetherCfg {
        &self.cfg
    }

    /// Score one event and run the intervention machine for its session.
    /// Unknown sessions are opened on the spot. Never fails.
    pub fn record_interaction(&self, event: InteractionEvent) -> DecisionEvent {
        loop {
            let slot = self.session_slot(&event);
            let mut state = lock(&slot);
            if state.closed {
                // Archived between lookup and lock; the map now holds a fresh slot.
                continue;
            }
            return self.apply(&mut state, event);
        }
    }

    fn apply(&self, state: &mut SessionState, event: InteractionEvent) -> DecisionEvent {
        let cfg = &*self.cfg;
        let mut warnings = Vec::new();

        if state.window.user_id() != event.user_id {
            tracing::warn!(
                session_id = %event.session_id,
                "session id reused by another user, reopening"
            );
            self.archive_state(state, CloseReason::Explicit, &mut warnings);
            *state = SessionState::open(&event);
        } else if state.window.interaction_count() > 0
            && state.window.is_idle(event.timestamp, cfg.inactivity_gap())
        {
            self.archive_state(state, CloseReason::Inactivity, &mut warnings);
            *state = SessionState::open(&event);
        }

        let (scored, trend) = {
            let ledger_slot = self.ledger_slot(&event.user_id);
            let mut ledger = lock(&ledger_slot);
            let scored = aggregator::ingest(&event, &mut state.window, &mut ledger, cfg);
            let trend = trend::analyze(ledger.recent(cfg.trend_lookback), cfg);
            (scored, trend)
        };
        let direction = (!trend.insufficient_data).then_some(trend.direction);

        let verdict = state.machine.evaluate(
            Reading {
                composite: scored.record.composite,
                crisis: scored.crisis.flagged,
                trend: direction,
                at: event.timestamp,
            },
            cfg,
        );

        // Crisis notice goes out first, while the session is still locked,
        // so it is never observed after a later transition of the same session.
        if let Some(esc) = escalation::escalate(&event, &scored.crisis)
            && let Err(w) = self.outbox.escalate(esc)
        {
            warnings.push(w);
        }
        if let Err(w) = self.outbox.publish(TelemetryEvent::Scored(scored.record.clone())) {
            warnings.push(w);
        }
        if let Some(t) = &verdict.transition
            && let Err(w) = self.outbox.publish(TelemetryEvent::Transition(t.clone()))
        {
            warnings.push(w);
        }
        warnings.dedup();

        let composite = scored.record.composite;
        DecisionEvent {
            event_id: event.id,
            session_id: event.session_id,
            user_id: event.user_id,
            composite_score: composite,
            subscores: scored.record.subscores,
            crisis: scored.crisis,
            level: verdict.level,
            transitioned: verdict.transition.is_some(),
            transition: verdict.transition,
            trend: direction,
            guidance: guidance::guidance(verdict.level, composite, scored.crisis.flagged),
            timestamp: event.timestamp,
            warnings,
        }
    }

    /// Current level of a session; `Normal` when the session is unknown.
    pub fn current_level(&self, session_id: &str) -> InterventionLevel {
        self.sessions
            .get(session_id)
            .map(|slot| Arc::clone(slot.value()))
            .map(|slot| lock(&slot).machine.level())
            .unwrap_or_default()
    }

    /// Level changes of an open session, oldest first.
    pub fn transitions(&self, session_id: &str) -> Vec<LevelTransition> {
        self.sessions
            .get(session_id)
            .map(|slot| Arc::clone(slot.value()))
            .map(|slot| lock(&slot).machine.transitions().to_vec())
            .unwrap_or_default()
    }

    /// A user's score history, oldest first. Unknown users yield an empty list.
    pub fn history(&self, user_id: &str, window: HistoryWindow) -> Vec<DependencyScoreRecord> {
        self.ledgers
            .get(user_id)
            .map(|slot| Arc::clone(slot.value()))
            .map(|slot| lock(&slot).history(window))
            .unwrap_or_default()
    }

    /// Trend over the configured look-back window, across all the user's sessions.
    pub fn trend(&self, user_id: &str) -> TrendSummary {
        let recent = self.history(user_id, HistoryWindow::Last(self.cfg.trend_lookback));
        trend::analyze(&recent, &self.cfg)
    }

    /// The last [`ARCHIVE_PER_USER`] summaries of a user's closed sessions,
    /// oldest first.
    pub fn archived(&self, user_id: &str) -> Vec<SessionSummary> {
        self.archive
            .get(user_id)
            .map(|list| list.value().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Close a session on the caller's request.
    pub fn close_session(&self, session_id: &str) -> Option<ClosedSession> {
        let (_, slot) = self.sessions.remove(session_id)?;
        let mut state = lock(&slot);
        let mut warnings = Vec::new();
        let summary = self.archive_state(&mut state, CloseReason::Explicit, &mut warnings);
        Some(ClosedSession { summary, warnings })
    }

    /// Close every session idle for longer than the inactivity gap as of `now`.
    /// Passive: the caller decides when to sweep.
    pub fn sweep_idle(&self, now: DateTime<Utc>) -> Vec<ClosedSession> {
        let gap = self.cfg.inactivity_gap();
        let slots: Vec<(SessionId, SessionSlot)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut closed = Vec::new();
        for (id, slot) in slots {
            let mut state = lock(&slot);
            if state.closed || !state.window.is_idle(now, gap) {
                continue;
            }
            // Writers never take the sessions map while holding a session lock.
            if self.sessions.remove_if(&id, |_, v| Arc::ptr_eq(v, &slot)).is_none() {
                continue;
            }
            let mut warnings = Vec::new();
            let summary = self.archive_state(&mut state, CloseReason::Inactivity, &mut warnings);
            closed.push(ClosedSession { summary, warnings });
        }
        closed
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn archive_state(
        &self,
        state: &mut SessionState,
        reason: CloseReason,
        warnings: &mut Vec<DeliveryWarning>,
    ) -> SessionSummary {
        state.closed = true;
        let summary = state.summarize(reason);
        tracing::info!(
            user_id = %summary.user_id,
            session_id = %summary.session_id,
            reason = ?reason,
            events = summary.event_count,
            final_level = summary.final_level.as_str(),
            peak = summary.peak_score,
            "session closed"
        );
        {
            let mut list = self.archive.entry(summary.user_id.clone()).or_default();
            if list.len() == ARCHIVE_PER_USER {
                list.pop_front();
            }
            list.push_back(summary.clone());
        }
        if let Err(w) = self.outbox.publish(TelemetryEvent::SessionClosed(summary.clone())) {
            warnings.push(w);
        }
        summary
    }

    fn session_slot(&self, event: &InteractionEvent) -> SessionSlot {
        let entry = self
            .sessions
            .entry(event.session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::open(event))));
        Arc::clone(entry.value())
    }

    fn ledger_slot(&self, user_id: &str) -> LedgerSlot {
        if let Some(slot) = self.ledgers.get(user_id) {
            return Arc::clone(slot.value());
        }
        let entry = self
            .ledgers
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UserLedger::default())));
        Arc::clone(entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkKind;
    use crate::types::{CrisisSeverity, TransitionCause};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn engine() -> (Engine, EscalationReceiver, TelemetryReceiver) {
        Engine::new(TetherCfg::default()).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let cfg = TetherCfg { gentle_threshold: 50.0, ..Default::default() };
        assert!(Engine::new(cfg).is_err());
    }

    #[test]
    fn unknown_session_is_opened_on_first_event() {
        let (engine, _esc, _tel) = engine();
        assert_eq!(engine.open_sessions(), 0);
        let d = engine.record_interaction(InteractionEvent::at("u1", "s1", "hello", t0()));
        assert_eq!(engine.open_sessions(), 1);
        assert_eq!(d.level, InterventionLevel::Normal);
        assert!(!d.transitioned);
        assert!(d.trend.is_none());
        assert_eq!(d.subscores.frequency, 2.0);
        assert_eq!(d.composite_score, 2.0);
    }

    #[test]
    fn crisis_on_first_message_goes_high_and_escalates() {
        let (engine, mut esc, _tel) = engine();
        let d = engine.record_interaction(InteractionEvent::at(
            "u1",
            "s1",
            "I am going to kill myself tonight",
            t0(),
        ));
        assert_eq!(d.level, InterventionLevel::High);
        assert!(d.crisis.flagged);
        assert_eq!(d.crisis.severity, Some(CrisisSeverity::ExplicitIntent));
        assert_eq!(d.transition.as_ref().map(|t| t.cause), Some(TransitionCause::Crisis));
        assert!(d.warnings.is_empty());
        assert!(d.composite_score < 70.0);

        let notice = esc.try_recv().unwrap();
        assert_eq!(notice.session_id, "s1");
        assert_eq!(notice.severity, CrisisSeverity::ExplicitIntent);
        assert!(esc.try_recv().is_err());
    }

    #[test]
    fn same_input_scores_identically() {
        let ev = InteractionEvent::at("u1", "s1", "you're my only friend, nobody cares", t0());
        let (a, _ea, _ta) = engine();
        let (b, _eb, _tb) = engine();
        let da = a.record_interaction(ev.clone());
        let db = b.record_interaction(ev);
        assert_eq!(da.composite_score, db.composite_score);
        assert_eq!(da.subscores, db.subscores);
    }

    #[test]
    fn history_grows_one_record_per_event() {
        let (engine, _esc, _tel) = engine();
        for i in 0..3 {
            let at = t0() + Duration::minutes(i);
            engine.record_interaction(InteractionEvent::at("u1", "s1", "hey", at));
            assert_eq!(engine.history("u1", HistoryWindow::All).len(), (i + 1) as usize);
        }
        let last = engine.history("u1", HistoryWindow::Last(1));
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].timestamp, t0() + Duration::minutes(2));
    }

    #[test]
    fn unknown_user_and_session_are_empty() {
        let (engine, _esc, _tel) = engine();
        assert!(engine.history("ghost", HistoryWindow::All).is_empty());
        assert!(engine.transitions("ghost").is_empty());
        assert!(engine.archived("ghost").is_empty());
        assert_eq!(engine.current_level("ghost"), InterventionLevel::Normal);
        let trend = engine.trend("ghost");
        assert!(trend.insufficient_data);
        assert_eq!(trend.records_analyzed, 0);
    }

    #[test]
    fn idle_gap_closes_session_on_next_event() {
        let (engine, _esc, _tel) = engine();
        engine.record_interaction(InteractionEvent::at("u1", "s1", "hi", t0()));
        engine.record_interaction(InteractionEvent::at(
            "u1",
            "s1",
            "back again",
            t0() + Duration::minutes(31),
        ));
        let archived = engine.archived("u1");
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].reason, CloseReason::Inactivity);
        assert_eq!(archived[0].event_count, 1);
        assert_eq!(engine.open_sessions(), 1);
        // History is per user and survives the session boundary.
        assert_eq!(engine.history("u1", HistoryWindow::All).len(), 2);
    }

    #[test]
    fn close_session_archives_and_forgets() {
        let (engine, _esc, mut tel) = engine();
        engine.record_interaction(InteractionEvent::at("u1", "s1", "hi", t0()));
        let closed = engine.close_session("s1").unwrap();
        assert_eq!(closed.summary.reason, CloseReason::Explicit);
        assert!(closed.warnings.is_empty());
        assert_eq!(engine.open_sessions(), 0);
        assert_eq!(engine.current_level("s1"), InterventionLevel::Normal);
        assert!(engine.close_session("s1").is_none());

        let mut saw_close = false;
        while let Ok(ev) = tel.try_recv() {
            if matches!(ev, TelemetryEvent::SessionClosed(_)) {
                saw_close = true;
            }
        }
        assert!(saw_close);
    }

    #[test]
    fn sweep_closes_only_idle_sessions() {
        let (engine, _esc, _tel) = engine();
        engine.record_interaction(InteractionEvent::at("u1", "old", "hi", t0()));
        engine.record_interaction(InteractionEvent::at(
            "u2",
            "fresh",
            "hi",
            t0() + Duration::minutes(25),
        ));
        let closed = engine.sweep_idle(t0() + Duration::minutes(40));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].summary.session_id, "old");
        assert_eq!(closed[0].summary.reason, CloseReason::Inactivity);
        assert_eq!(engine.open_sessions(), 1);
        assert!(engine.sweep_idle(t0() + Duration::minutes(40)).is_empty());
    }

    #[test]
    fn missing_escalation_sink_is_reported_not_fatal() {
        let engine = Engine::with_outbox(TetherCfg::default(), Outbox::detached()).unwrap();
        let d = engine.record_interaction(InteractionEvent::at("u1", "s1", "i want to die", t0()));
        assert_eq!(d.level, InterventionLevel::High);
        assert_eq!(
            d.warnings,
            vec![DeliveryWarning::Unavailable { sink: SinkKind::Escalation }]
        );
    }

    #[test]
    fn concurrent_sessions_do_not_interfere() {
        let (engine, _esc, _tel) = Engine::new(TetherCfg {
            escalation_buffer: 1,
            telemetry_buffer: 1,
            ..Default::default()
        })
        .unwrap();

        std::thread::scope(|s| {
            for u in 0..4 {
                let engine = &engine;
                s.spawn(move || {
                    for i in 0..20 {
                        engine.record_interaction(InteractionEvent::at(
                            format!("user-{u}"),
                            format!("session-{u}"),
                            "hello there",
                            t0() + Duration::seconds(i),
                        ));
                    }
                });
            }
        });

        assert_eq!(engine.open_sessions(), 4);
        for u in 0..4 {
            assert_eq!(engine.history(&format!("user-{u}"), HistoryWindow::All).len(), 20);
        }
    }

    #[test]
    fn concurrent_writers_to_one_session_are_serialized() {
        let (engine, _esc, _tel) = engine();
        std::thread::scope(|s| {
            for _ in 0..8 {
                let engine = &engine;
                s.spawn(move || {
                    for _ in 0..10 {
                        engine.record_interaction(InteractionEvent::at("u1", "s1", "hi", t0()));
                    }
                });
            }
        });
        let history = engine.history("u1", HistoryWindow::All);
        assert_eq!(history.len(), 80);
        assert_eq!(history.last().map(|r| r.subscores.frequency), Some(30.0));
    }

    #[test]
    fn oversized_windows_fail_at_construction() {
        let gap = TetherCfg { inactivity_gap_secs: 10_000_000_000_000_000, ..Default::default() };
        assert!(Engine::new(gap).is_err());
        let wrap = TetherCfg { inactivity_gap_secs: u64::MAX, ..Default::default() };
        assert!(Engine::new(wrap).is_err());
        let cooldown = TetherCfg { hysteresis_cooldown_secs: u64::MAX, ..Default::default() };
        assert!(Engine::with_outbox(cooldown, Outbox::detached()).is_err());
    }

    #[test]
    fn longest_gap_keeps_session_open() {
        let cfg = TetherCfg {
            inactivity_gap_secs: crate::config::MAX_WINDOW_SECS,
            ..Default::default()
        };
        let (engine, _esc, _tel) = Engine::new(cfg).unwrap();
        for s in 0..3 {
            let at = t0() + Duration::seconds(s);
            engine.record_interaction(InteractionEvent::at("u", "s", "hi", at));
        }
        assert!(engine.archived("u").is_empty());
        assert_eq!(engine.open_sessions(), 1);
    }

    #[test]
    fn lexicon_built_in_code_must_be_normalised() {
        use crate::lexicon::{CrisisPhrase, LexiconSet};

        let mut lexicon = LexiconSet::english();
        lexicon.crisis = vec![CrisisPhrase {
            phrase: "I can't go on".into(),
            severity: CrisisSeverity::Ideation,
        }];
        let raw = TetherCfg { lexicon: lexicon.clone(), ..Default::default() };
        assert!(Engine::new(raw).is_err());

        let cfg = TetherCfg { lexicon: lexicon.prepared().unwrap(), ..Default::default() };
        let (engine, _esc, _tel) = Engine::new(cfg).unwrap();
        let d = engine.record_interaction(InteractionEvent::at("u", "s", "I can't go on", t0()));
        assert!(d.crisis.flagged);
        assert_eq!(d.level, InterventionLevel::High);
    }

    #[test]
    fn close_reports_telemetry_delivery_failure() {
        let (engine, _esc, tel) = engine();
        drop(tel);
        engine.record_interaction(InteractionEvent::at("u1", "s1", "hi", t0()));
        engine.record_interaction(InteractionEvent::at("u1", "s2", "hi", t0()));

        let closed = engine.close_session("s1").unwrap();
        assert_eq!(
            closed.warnings,
            vec![DeliveryWarning::Unavailable { sink: SinkKind::Telemetry }]
        );

        let swept = engine.sweep_idle(t0() + Duration::hours(1));
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].warnings.len(), 1);
        assert_eq!(swept[0].warnings[0].sink(), SinkKind::Telemetry);
    }

    #[test]
    fn archive_keeps_most_recent_summaries() {
        let (engine, _esc, _tel) = Engine::new(TetherCfg {
            telemetry_buffer: 1,
            ..Default::default()
        })
        .unwrap();
        let total = ARCHIVE_PER_USER + 5;
        for i in 0..total {
            let session = format!("s{i}");
            engine.record_interaction(InteractionEvent::at("u1", session.clone(), "hi", t0()));
            engine.close_session(&session);
        }
        let archived = engine.archived("u1");
        assert_eq!(archived.len(), ARCHIVE_PER_USER);
        assert_eq!(archived[0].session_id, "s5");
        let newest = format!("s{}", total - 1);
        assert_eq!(archived.last().map(|s| s.session_id.as_str()), Some(newest.as_str()));
    }

    #[test]
    fn summary_carries_mean_subscores() {
        let (engine, _esc, _tel) = engine();
        engine.record_interaction(InteractionEvent::at("u1", "s1", "hi", t0()));
        engine.record_interaction(InteractionEvent::at(
            "u1",
            "s1",
            "I feel so alone",
            t0() + Duration::minutes(4),
        ));
        let closed = engine.close_session("s1").unwrap();
        assert_eq!(closed.summary.event_count, 2);
        assert_eq!(closed.summary.mean_subscores.isolation, 3.5);
        assert_eq!(closed.summary.mean_subscores.crisis, 0.0);
    }
}
