use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::TetherCfg;
use crate::error::{DeliveryWarning, SinkKind};
use crate::types::{EscalationEvent, TelemetryEvent};

/// Escalation channel sender. The engine pushes crisis notices here.
pub type EscalationSender = mpsc::Sender<EscalationEvent>;
/// Escalation channel receiver, consumed by the human-handoff side.
pub type EscalationReceiver = mpsc::Receiver<EscalationEvent>;
/// Telemetry channel sender.
pub type TelemetrySender = mpsc::Sender<TelemetryEvent>;
/// Telemetry channel receiver, consumed by storage and analytics.
pub type TelemetryReceiver = mpsc::Receiver<TelemetryEvent>;

/// Non-blocking hand-off point to the external sinks.
///
/// Every send is a `try_send`: a full channel drops the event with a warning
/// rather than stalling the scoring path. A missing escalation sink is
/// reported; a missing telemetry sink is simply skipped.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    escalation: Option<EscalationSender>,
    telemetry: Option<TelemetrySender>,
}

impl Outbox {
    /// No sinks attached.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn with_escalation(mut self, tx: EscalationSender) -> Self {
        self.escalation = Some(tx);
        self
    }

    pub fn with_telemetry(mut self, tx: TelemetrySender) -> Self {
        self.telemetry = Some(tx);
        self
    }

    pub fn escalate(&self, event: EscalationEvent) -> Result<(), DeliveryWarning> {
        let Some(tx) = &self.escalation else {
            tracing::warn!(user_id = %event.user_id, "no escalation sink attached");
            return Err(DeliveryWarning::Unavailable { sink: SinkKind::Escalation });
        };
        try_deliver(tx, event, SinkKind::Escalation)
    }

    pub fn publish(&self, event: TelemetryEvent) -> Result<(), DeliveryWarning> {
        match &self.telemetry {
            Some(tx) => try_deliver(tx, event, SinkKind::Telemetry),
            None => Ok(()),
        }
    }
}

fn try_deliver<T>(tx: &mpsc::Sender<T>, item: T, sink: SinkKind) -> Result<(), DeliveryWarning> {
    match tx.try_send(item) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            tracing::warn!(sink = ?sink, "sink backlogged, event dropped");
            Err(DeliveryWarning::Backpressure { sink })
        }
        Err(TrySendError::Closed(_)) => {
            tracing::warn!(sink = ?sink, "sink closed");
            Err(DeliveryWarning::Unavailable { sink })
        }
    }
}

/// Create both channels sized from `cfg` and an outbox wired to them.
pub fn channels(cfg: &TetherCfg) -> (Outbox, EscalationReceiver, TelemetryReceiver) {
    let (esc_tx, esc_rx) = mpsc::channel(cfg.escalation_buffer);
    let (tel_tx, tel_rx) = mpsc::channel(cfg.telemetry_buffer);
    let outbox = Outbox::detached().with_escalation(esc_tx).with_telemetry(tel_tx);
    (outbox, esc_rx, tel_rx)
}
