use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use anyhow::Context;
use tether_core::Engine;
use tether_core::io::outbox::{EscalationReceiver, TelemetryReceiver};
use tether_core::types::InteractionEvent;

/// Feed a JSONL file of events through the engine, one decision per output
/// line. Escalations go to stderr as they are raised.
pub fn run(
    engine: &Engine,
    path: &Path,
    mut esc_rx: EscalationReceiver,
    mut tel_rx: TelemetryReceiver,
) -> anyhow::Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut replayed = 0usize;

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: InteractionEvent = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: not an interaction event", path.display(), idx + 1))?;

        let decision = engine.record_interaction(event);
        serde_json::to_writer(&mut out, &decision)?;
        writeln!(out)?;
        replayed += 1;

        while let Ok(esc) = esc_rx.try_recv() {
            eprintln!(
                "escalation: user {} session {} severity {}",
                esc.user_id,
                esc.session_id,
                esc.severity.as_str(),
            );
        }
        // Nothing consumes telemetry here; keep the channel from filling up.
        while tel_rx.try_recv().is_ok() {}
    }

    out.flush()?;
    tracing::info!(path = %path.display(), events = replayed, "replay finished");
    Ok(())
}
