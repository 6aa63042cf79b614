use chrono::{DateTime, Utc};

use crate::config::TetherCfg;
use crate::types::{InterventionLevel, LevelTransition, SessionId, TransitionCause, TrendDirection};

/// Map a composite score to its bucket.
pub fn bucket(score: f32, cfg: &TetherCfg) -> InterventionLevel {
    InterventionLevel::ALL
        .into_iter()
        .rev()
        .find(|level| score >= cfg.threshold(*level))
        .unwrap_or(InterventionLevel::Normal)
}

/// Inputs to one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub composite: f32,
    pub crisis: bool,
    pub trend: Option<TrendDirection>,
    pub at: DateTime<Utc>,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub level: InterventionLevel,
    pub transition: Option<LevelTransition>,
    /// A downgrade was due but hysteresis kept the current level.
    pub held: bool,
}

/// Per-session intervention state machine.
///
/// Level = bucket(score), except:
/// - crisis forces `High` immediately, whatever the state;
/// - a single-step downgrade right after an upgrade is held once while the
///   cooldown since that upgrade is running;
/// - a rising trend lifts a score within the borderline margin of the next
///   threshold by one level.
#[derive(Debug)]
pub struct InterventionMachine {
    session_id: SessionId,
    level: InterventionLevel,
    last_upgrade_at: Option<DateTime<Utc>>,
    hold_spent: bool,
    transitions: Vec<LevelTransition>,
}

impl InterventionMachine {
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            level: InterventionLevel::Normal,
            last_upgrade_at: None,
            hold_spent: false,
            transitions: Vec::new(),
        }
    }

    pub fn level(&self) -> InterventionLevel {
        self.level
    }

    /// Every transition so far, oldest first.
    pub fn transitions(&self) -> &[LevelTransition] {
        &self.transitions
    }

    pub fn evaluate(&mut self, reading: Reading, cfg: &TetherCfg) -> Verdict {
        if reading.crisis {
            return self.force_high(reading.at);
        }

        let (target, cause) = self.target(reading, cfg);

        if target == self.level {
            return self.stay(false);
        }

        if target > self.level {
            self.last_upgrade_at = Some(reading.at);
            self.hold_spent = false;
            return self.move_to(target, cause, reading.at);
        }

        let single_step = self.level.rank() - target.rank() == 1;
        let in_cooldown = self
            .last_upgrade_at
            .is_some_and(|t| reading.at - t <= cfg.hysteresis_cooldown());
        if single_step && in_cooldown && !self.hold_spent {
            self.hold_spent = true;
            tracing::debug!(
                session_id = %self.session_id,
                level = self.level.as_str(),
                wanted = target.as_str(),
                "downgrade held by hysteresis"
            );
            return self.stay(true);
        }

        let cause = if self.hold_spent {
            TransitionCause::HysteresisRelease
        } else {
            cause
        };
        self.last_upgrade_at = None;
        self.hold_spent = false;
        self.move_to(target, cause, reading.at)
    }

    /// Bucket the score, then let a rising trend lift a borderline score.
    fn target(&self, reading: Reading, cfg: &TetherCfg) -> (InterventionLevel, TransitionCause) {
        let base = bucket(reading.composite, cfg);
        if reading.trend == Some(TrendDirection::Rising) && base < InterventionLevel::High {
            let next = base.raised();
            if cfg.threshold(next) - reading.composite <= cfg.trend_borderline_margin {
                return (next, TransitionCause::TrendAdvisory);
            }
        }
        (base, TransitionCause::Score)
    }

    fn force_high(&mut self, at: DateTime<Utc>) -> Verdict {
        // Crisis re-anchors the cooldown even when already at High.
        self.last_upgrade_at = Some(at);
        self.hold_spent = false;
        if self.level == InterventionLevel::High {
            return self.stay(false);
        }
        self.move_to(InterventionLevel::High, TransitionCause::Crisis, at)
    }

    fn stay(&self, held: bool) -> Verdict {
        Verdict { level: self.level, transition: None, held }
    }

    fn move_to(
        &mut self,
        to: InterventionLevel,
        cause: TransitionCause,
        at: DateTime<Utc>,
    ) -> Verdict {
        let transition = LevelTransition {
            session_id: self.session_id.clone(),
            from: self.level,
            to,
            cause,
            at,
        };
        tracing::info!(
            session_id = %self.session_id,
            from = transition.from.as_str(),
            to = transition.to.as_str(),
            cause = ?cause,
            "intervention level changed"
        );
        self.level = to;
        self.transitions.push(transition.clone());
        Verdict { level: to, transition: Some(transition), held: false }
    }
}
