use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DeliveryWarning;

/// Caller-assigned session identifier.
pub type SessionId = String;
/// Caller-assigned user identifier.
pub type UserId = String;

/// Upper bound of the frequency sub-score.
pub const FREQUENCY_MAX: f32 = 30.0;
/// Upper bound of the duration sub-score.
pub const DURATION_MAX: f32 = 20.0;
/// Upper bound of the emotional-dependency sub-score.
pub const EMOTIONAL_MAX: f32 = 25.0;
/// Upper bound of the isolation sub-score.
pub const ISOLATION_MAX: f32 = 25.0;
/// Upper bound of the crisis sub-score.
pub const CRISIS_MAX: f32 = 30.0;
/// Upper bound of the composite dependency score.
pub const COMPOSITE_MAX: f32 = 100.0;

// ── Input ───────────────────────────────────────────────────────

/// One user turn, as handed over by the caller.
///
/// The raw text is only read during scoring. It is never serialized back out,
/// so records and telemetry built from an event cannot leak it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub user_id: UserId,
    pub session_id: SessionId,
    #[serde(default, skip_serializing)]
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl InteractionEvent {
    pub fn new(
        user_id: impl Into<UserId>,
        session_id: impl Into<SessionId>,
        text: impl Into<String>,
    ) -> Self {
        Self::at(user_id, session_id, text, Utc::now())
    }

    pub fn at(
        user_id: impl Into<UserId>,
        session_id: impl Into<SessionId>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            text: text.into(),
            timestamp,
        }
    }
}

// ── Scores ──────────────────────────────────────────────────────

/// Per-event factor scores. Each field stays inside its own bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScoreSet {
    /// 0–30
    pub frequency: f32,
    /// 0–20
    pub duration: f32,
    /// 0–25
    pub emotional_dependency: f32,
    /// 0–25
    pub isolation: f32,
    /// 0–30, carried beside the composite and never summed into it.
    pub crisis: f32,
}

/// Crisis severity tiers, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrisisSeverity {
    Hopelessness,
    Ideation,
    ExplicitIntent,
}

impl CrisisSeverity {
    /// Sub-score contributed by this tier.
    pub fn score(&self) -> f32 {
        match self {
            Self::Hopelessness => 10.0,
            Self::Ideation => 20.0,
            Self::ExplicitIntent => CRISIS_MAX,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hopelessness => "hopelessness",
            Self::Ideation => "ideation",
            Self::ExplicitIntent => "explicit_intent",
        }
    }
}

/// Crisis detector output for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CrisisSignal {
    pub flagged: bool,
    pub severity: Option<CrisisSeverity>,
    /// 0–30
    pub score: f32,
}

impl CrisisSignal {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_severity(severity: CrisisSeverity) -> Self {
        Self {
            flagged: true,
            severity: Some(severity),
            score: severity.score(),
        }
    }
}

/// One appended history entry. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyScoreRecord {
    pub user_id: UserId,
    pub session_id: SessionId,
    /// 0–100
    pub composite: f32,
    pub subscores: SubScoreSet,
    pub crisis: bool,
    pub crisis_severity: Option<CrisisSeverity>,
    pub timestamp: DateTime<Utc>,
}

/// Slice of a user's history to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    All,
    /// The most recent `n` records.
    Last(usize),
    /// Records at or after the given instant.
    Since(DateTime<Utc>),
}

// ── Intervention ────────────────────────────────────────────────

/// Response posture, totally ordered from least to most intervention.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum InterventionLevel {
    #[default]
    Normal,
    Gentle,
    Moderate,
    High,
}

impl InterventionLevel {
    pub const ALL: [Self; 4] = [Self::Normal, Self::Gentle, Self::Moderate, Self::High];

    pub fn rank(&self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Gentle => 1,
            Self::Moderate => 2,
            Self::High => 3,
        }
    }

    /// One level up, saturating at `High`.
    pub fn raised(&self) -> Self {
        match self {
            Self::Normal => Self::Gentle,
            Self::Gentle => Self::Moderate,
            Self::Moderate | Self::High => Self::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Gentle => "gentle",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }
}

/// Why the level changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Composite score moved into another bucket.
    Score,
    /// Crisis language forced `High`.
    Crisis,
    /// Borderline score raised one level by a rising trend.
    TrendAdvisory,
    /// A downgrade held back by hysteresis was let through.
    HysteresisRelease,
}

/// Auditable level change for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelTransition {
    pub session_id: SessionId,
    pub from: InterventionLevel,
    pub to: InterventionLevel,
    pub cause: TransitionCause,
    pub at: DateTime<Utc>,
}

impl LevelTransition {
    pub fn is_upgrade(&self) -> bool {
        self.to > self.from
    }
}

// ── Trend ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

/// Advisory read of where a user's scores are heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendRecommendation {
    ImmediateIntervention,
    EscalateBoundaries,
    IncreaseReminders,
    MaintainApproach,
    ContinueMonitoring,
}

/// Derived view over the look-back window. Recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub direction: TrendDirection,
    /// Least-squares slope in composite points per record.
    pub slope: f32,
    pub current: f32,
    pub mean: f32,
    pub peak: f32,
    pub records_analyzed: usize,
    pub sessions_spanned: usize,
    pub insufficient_data: bool,
    pub recommendation: TrendRecommendation,
}

// ── Guidance ────────────────────────────────────────────────────

/// Interaction posture recommended to the prompt-rendering side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    EmotionalSupport,
    TaskAssistance,
    BalancedInteraction,
    CrisisIntervention,
}

/// Follow-up action tags. Rendering them into words is someone else's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUp {
    ProvideCrisisResources,
    LimitSessionLength,
    EncourageHumanContact,
    EncourageRealWorldConnections,
    SuggestSessionBreaks,
    PromoteSelfReflection,
    EncourageAutonomy,
    EscalateToCrisisServices,
    EndSession,
    FlagForReview,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guidance {
    pub mode: InteractionMode,
    pub follow_ups: Vec<FollowUp>,
    pub monitoring: bool,
}

// ── Emitted events ──────────────────────────────────────────────

/// Result of one ingest call.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEvent {
    pub event_id: Uuid,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub composite_score: f32,
    pub subscores: SubScoreSet,
    pub crisis: CrisisSignal,
    pub level: InterventionLevel,
    pub transitioned: bool,
    pub transition: Option<LevelTransition>,
    pub trend: Option<TrendDirection>,
    pub guidance: Guidance,
    pub timestamp: DateTime<Utc>,
    /// Sinks that could not take their event. Scoring itself still succeeded.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DeliveryWarning>,
}

/// High-priority notification emitted alongside a crisis transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub id: Uuid,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub severity: CrisisSeverity,
    pub timestamp: DateTime<Utc>,
}

/// Coarse health classification of a closed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryHealth {
    Healthy,
    Concerning,
    Critical,
}

impl BoundaryHealth {
    pub fn classify(score: f32) -> Self {
        if score < 30.0 {
            Self::Healthy
        } else if score < 60.0 {
            Self::Concerning
        } else {
            Self::Critical
        }
    }
}

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Explicit,
    Inactivity,
}

/// Archived final state of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub reason: CloseReason,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub event_count: u32,
    pub final_level: InterventionLevel,
    pub final_score: f32,
    pub peak_score: f32,
    /// Per-factor average over the session's events.
    pub mean_subscores: SubScoreSet,
    pub crisis_seen: bool,
    pub transition_count: usize,
    pub health: BoundaryHealth,
}

/// Result of closing a session: the archived summary plus any problem
/// handing it to the telemetry sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedSession {
    pub summary: SessionSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DeliveryWarning>,
}

/// Everything handed to the telemetry side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Scored(DependencyScoreRecord),
    Transition(LevelTransition),
    SessionClosed(SessionSummary),
}
