use uuid::Uuid;

use crate::types::{CrisisSignal, EscalationEvent, InteractionEvent};

/// Build the escalation notice for a flagged crisis signal.
/// Returns `None` when nothing was flagged.
pub fn escalate(event: &InteractionEvent, crisis: &CrisisSignal) -> Option<EscalationEvent> {
    if !crisis.flagged {
        return None;
    }
    let severity = crisis.severity?;
    tracing::warn!(
        user_id = %event.user_id,
        session_id = %event.session_id,
        severity = severity.as_str(),
        "crisis language detected, escalating"
    );
    Some(EscalationEvent {
        id: Uuid::new_v4(),
        user_id: event.user_id.clone(),
        session_id: event.session_id.clone(),
        severity,
        timestamp: event.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CrisisSeverity;

    #[test]
    fn flagged_signal_escalates_with_event_identity() {
        let event = InteractionEvent::new("u7", "s7", "...");
        let signal = CrisisSignal::from_severity(CrisisSeverity::Ideation);
        let esc = escalate(&event, &signal).unwrap();
        assert_eq!(esc.user_id, "u7");
        assert_eq!(esc.session_id, "s7");
        assert_eq!(esc.severity, CrisisSeverity::Ideation);
        assert_eq!(esc.timestamp, event.timestamp);
    }

    #[test]
    fn clean_signal_does_not_escalate() {
        let event = InteractionEvent::new("u", "s", "hello");
        assert!(escalate(&event, &CrisisSignal::none()).is_none());
    }
}
