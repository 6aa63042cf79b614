use crate::types::{FollowUp, Guidance, InteractionMode, InterventionLevel};

/// Recommended interaction posture for a composite score.
pub fn mode_for(composite: f32, crisis: bool) -> InteractionMode {
    if crisis || composite >= 80.0 {
        InteractionMode::CrisisIntervention
    } else if composite >= 60.0 {
        InteractionMode::TaskAssistance
    } else if composite >= 30.0 {
        InteractionMode::BalancedInteraction
    } else {
        InteractionMode::EmotionalSupport
    }
}

fn follow_ups(level: InterventionLevel, crisis: bool) -> Vec<FollowUp> {
    if crisis {
        return vec![
            FollowUp::EscalateToCrisisServices,
            FollowUp::EndSession,
            FollowUp::FlagForReview,
        ];
    }
    match level {
        InterventionLevel::High => vec![
            FollowUp::ProvideCrisisResources,
            FollowUp::LimitSessionLength,
            FollowUp::EncourageHumanContact,
        ],
        InterventionLevel::Moderate => vec![
            FollowUp::EncourageRealWorldConnections,
            FollowUp::SuggestSessionBreaks,
        ],
        InterventionLevel::Gentle => vec![FollowUp::PromoteSelfReflection, FollowUp::EncourageAutonomy],
        InterventionLevel::Normal => Vec::new(),
    }
}

/// Structured hints for whoever renders the model-facing instructions.
pub fn guidance(level: InterventionLevel, composite: f32, crisis: bool) -> Guidance {
    Guidance {
        mode: mode_for(composite, crisis),
        follow_ups: follow_ups(level, crisis),
        monitoring: crisis || level >= InterventionLevel::Moderate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_bands() {
        assert_eq!(mode_for(10.0, false), InteractionMode::EmotionalSupport);
        assert_eq!(mode_for(30.0, false), InteractionMode::BalancedInteraction);
        assert_eq!(mode_for(60.0, false), InteractionMode::TaskAssistance);
        assert_eq!(mode_for(80.0, false), InteractionMode::CrisisIntervention);
        assert_eq!(mode_for(0.0, true), InteractionMode::CrisisIntervention);
    }

    #[test]
    fn normal_has_no_follow_ups() {
        let g = guidance(InterventionLevel::Normal, 5.0, false);
        assert!(g.follow_ups.is_empty());
        assert!(!g.monitoring);
    }

    #[test]
    fn crisis_follow_ups_replace_level_ones() {
        let g = guidance(InterventionLevel::High, 12.0, true);
        assert_eq!(g.mode, InteractionMode::CrisisIntervention);
        assert!(g.follow_ups.contains(&FollowUp::EscalateToCrisisServices));
        assert!(!g.follow_ups.contains(&FollowUp::LimitSessionLength));
        assert!(g.monitoring);
    }

    #[test]
    fn moderate_is_monitored() {
        let g = guidance(InterventionLevel::Moderate, 45.0, false);
        assert!(g.monitoring);
        assert_eq!(g.mode, InteractionMode::BalancedInteraction);
        assert!(g.follow_ups.contains(&FollowUp::SuggestSessionBreaks));
    }
}
