use chrono::{DateTime, Duration, Utc};

use crate::types::{InteractionEvent, SessionId, SubScoreSet, UserId};

/// Running aggregates for one open session.
///
/// Owned by the aggregator side of a single session; replaced wholesale when
/// the session closes.
#[derive(Debug, Clone)]
pub struct SessionWindow {
    session_id: SessionId,
    user_id: UserId,
    started_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,
    interaction_count: u32,
    daily_interactions: u32,
    totals: SubScoreSet,
    last_composite: f32,
    peak_composite: f32,
    crisis_seen: bool,
}

impl SessionWindow {
    /// Open a window anchored at `event`. The event itself is not yet counted.
    pub fn open(event: &InteractionEvent) -> Self {
        Self {
            session_id: event.session_id.clone(),
            user_id: event.user_id.clone(),
            started_at: event.timestamp,
            last_event_at: event.timestamp,
            interaction_count: 0,
            daily_interactions: 0,
            totals: SubScoreSet::default(),
            last_composite: 0.0,
            peak_composite: 0.0,
            crisis_seen: false,
        }
    }

    /// Passive inactivity check against the time of the incoming event.
    pub fn is_idle(&self, now: DateTime<Utc>, gap: Duration) -> bool {
        now - self.last_event_at > gap
    }

    /// Count `event`. `daily_interactions` is the user's count for the event's
    /// day, this event included. Out-of-order timestamps never move the
    /// window backwards.
    pub fn observe(&mut self, event: &InteractionEvent, daily_interactions: u32) {
        self.interaction_count += 1;
        self.daily_interactions = daily_interactions;
        if event.timestamp > self.last_event_at {
            self.last_event_at = event.timestamp;
        }
        if event.timestamp < self.started_at {
            self.started_at = event.timestamp;
        }
    }

    /// Fold one scored event into the running totals.
    pub fn accumulate(&mut self, subscores: &SubScoreSet, composite: f32, crisis: bool) {
        self.totals.frequency += subscores.frequency;
        self.totals.duration += subscores.duration;
        self.totals.emotional_dependency += subscores.emotional_dependency;
        self.totals.isolation += subscores.isolation;
        self.totals.crisis += subscores.crisis;
        self.last_composite = composite;
        self.peak_composite = self.peak_composite.max(composite);
        self.crisis_seen |= crisis;
    }

    pub fn duration_minutes(&self) -> f32 {
        let ms = (self.last_event_at - self.started_at).num_milliseconds().max(0);
        ms as f32 / 60_000.0
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_event_at(&self) -> DateTime<Utc> {
        self.last_event_at
    }

    pub fn interaction_count(&self) -> u32 {
        self.interaction_count
    }

    pub fn daily_interactions(&self) -> u32 {
        self.daily_interactions
    }

    /// Per-factor average over the events folded in so far.
    pub fn mean_subscores(&self) -> SubScoreSet {
        if self.interaction_count == 0 {
            return SubScoreSet::default();
        }
        let n = self.interaction_count as f32;
        SubScoreSet {
            frequency: self.totals.frequency / n,
            duration: self.totals.duration / n,
            emotional_dependency: self.totals.emotional_dependency / n,
            isolation: self.totals.isolation / n,
            crisis: self.totals.crisis / n,
        }
    }

    pub fn last_composite(&self) -> f32 {
        self.last_composite
    }

    pub fn peak_composite(&self) -> f32 {
        self.peak_composite
    }

    pub fn crisis_seen(&self) -> bool {
        self.crisis_seen
    }

    /// Window with explicit counters, for extractor tests.
    #[cfg(test)]
    pub(crate) fn synthetic(daily_interactions: u32, minutes: i64) -> Self {
        let start = Utc::now();
        let event = InteractionEvent::at("u", "s", "", start);
        let mut w = Self::open(&event);
        w.daily_interactions = daily_interactions;
        w.interaction_count = daily_interactions;
        w.last_event_at = start + Duration::minutes(minutes);
        w
    }
}
