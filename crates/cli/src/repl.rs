use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tether_core::Engine;
use tether_core::io::outbox::{EscalationReceiver, TelemetryReceiver};
use tether_core::types::{
    ClosedSession, DecisionEvent, HistoryWindow, InteractionEvent, TrendSummary,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

const SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_HISTORY: usize = 10;

/// Interactive console: every non-command line is ingested as one event.
pub async fn run(
    engine: Arc<Engine>,
    esc_rx: EscalationReceiver,
    tel_rx: TelemetryReceiver,
    startup_notice: Option<String>,
) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    spawn_escalation_printer(esc_rx, token.clone());
    spawn_telemetry_drain(tel_rx, token.clone());

    if let Some(notice) = startup_notice {
        println!("{notice}");
    }
    let cfg = engine.config();
    println!(
        "lexicon {}, thresholds gentle {} / moderate {} / high {}, idle after {}s",
        cfg.lexicon.locale,
        cfg.gentle_threshold,
        cfg.moderate_threshold,
        cfg.high_threshold,
        cfg.inactivity_gap_secs,
    );
    println!("commands: /user <id>  /session <id>  /close  /trend  /history [n]  /q");

    let mut user = String::from("local");
    let mut session = fresh_session_id();
    println!("user {user}, session {session}");

    let mut pending = read_line(DefaultEditor::new()?);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut sweep = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = sweep.tick() => {
                for closed in engine.sweep_idle(Utc::now()) {
                    print_closed(&closed);
                    if closed.summary.session_id == session {
                        session = fresh_session_id();
                    }
                }
            }
            read = &mut pending => {
                // Sender dropped: the reader thread panicked.
                let Ok((editor, line)) = read else { break };
                match line {
                    Ok(line) => {
                        let text = line.trim();
                        if matches!(text, "/q" | "/exit" | "/quit") {
                            break;
                        }
                        if !text.is_empty() {
                            handle_line(&engine, text, &mut user, &mut session);
                        }
                        pending = read_line(editor);
                    }
                    Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                    Err(err) => {
                        eprintln!("input error: {err}");
                        break;
                    }
                }
            }
        }
    }
    token.cancel();

    if let Some(closed) = engine.close_session(&session) {
        print_closed(&closed);
    }
    println!();
    Ok(())
}

type ReadResult = (DefaultEditor, rustyline::Result<String>);

/// Prompt for one line on a plain thread. The editor travels with the request
/// so history carries over between lines, and the prompt is only drawn once
/// the previous line's output has been printed.
fn read_line(mut editor: DefaultEditor) -> oneshot::Receiver<ReadResult> {
    let (tx, rx) = oneshot::channel();
    let _ = io::stdout().flush();
    std::thread::spawn(move || {
        let line = editor.readline("> ");
        if let Ok(text) = &line {
            let _ = editor.add_history_entry(text.as_str());
        }
        let _ = tx.send((editor, line));
    });
    rx
}

fn handle_line(engine: &Engine, text: &str, user: &mut String, session: &mut String) {
    let (cmd, arg) = match text.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (text, ""),
    };

    match cmd {
        "/user" if !arg.is_empty() => {
            if let Some(closed) = engine.close_session(session) {
                print_closed(&closed);
            }
            *user = arg.to_string();
            *session = fresh_session_id();
            println!("user {user}, session {session}");
        }
        "/session" if !arg.is_empty() => {
            *session = arg.to_string();
            println!("session {session} (level {})", engine.current_level(session).as_str());
        }
        "/close" => {
            match engine.close_session(session) {
                Some(closed) => print_closed(&closed),
                None => println!("session {session} has no events yet"),
            }
            *session = fresh_session_id();
            println!("session {session}");
        }
        "/trend" => print_trend(&engine.trend(user)),
        "/history" => {
            let n = arg.parse().unwrap_or(DEFAULT_HISTORY);
            let records = engine.history(user, HistoryWindow::Last(n));
            if records.is_empty() {
                println!("no history for {user}");
            }
            for r in records {
                println!(
                    "{}  {:>5.1}  {}{}",
                    r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    r.composite,
                    r.session_id,
                    if r.crisis { "  CRISIS" } else { "" },
                );
            }
        }
        c if c.starts_with('/') => {
            println!("unknown or incomplete command: {text}");
        }
        _ => {
            let event = InteractionEvent::new(user.clone(), session.clone(), text);
            print_decision(&engine.record_interaction(event));
        }
    }
}

fn print_decision(d: &DecisionEvent) {
    let s = &d.subscores;
    println!(
        "score {:.1} [freq {:.1} dur {:.1} emo {:.1} iso {:.1} crisis {:.0}]  level {}",
        d.composite_score,
        s.frequency,
        s.duration,
        s.emotional_dependency,
        s.isolation,
        s.crisis,
        d.level.as_str(),
    );
    if let Some(t) = &d.transition {
        println!("  {} -> {} ({:?})", t.from.as_str(), t.to.as_str(), t.cause);
    }
    if let Ok(guidance) = serde_json::to_string(&d.guidance) {
        println!("  guidance {guidance}");
    }
    for w in &d.warnings {
        println!("  warning: {w}");
    }
}

fn print_trend(t: &TrendSummary) {
    if t.insufficient_data {
        println!("trend: not enough data ({} records)", t.records_analyzed);
        return;
    }
    println!(
        "trend {:?} slope {:+.2}/record  current {:.1} mean {:.1} peak {:.1}  over {} records / {} sessions  -> {:?}",
        t.direction,
        t.slope,
        t.current,
        t.mean,
        t.peak,
        t.records_analyzed,
        t.sessions_spanned,
        t.recommendation,
    );
}

fn print_closed(closed: &ClosedSession) {
    let s = &closed.summary;
    println!(
        "session {} closed ({:?}): {} events, final {} at {:.1}, peak {:.1}, {:?}",
        s.session_id,
        s.reason,
        s.event_count,
        s.final_level.as_str(),
        s.final_score,
        s.peak_score,
        s.health,
    );
    for w in &closed.warnings {
        println!("  warning: {w}");
    }
}

fn fresh_session_id() -> String {
    format!("cli-{}", Utc::now().format("%Y%m%d-%H%M%S%3f"))
}

fn spawn_escalation_printer(mut rx: EscalationReceiver, token: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                ev = rx.recv() => {
                    let Some(ev) = ev else { break };
                    eprintln!(
                        "\n!! escalation: user {} session {} severity {}",
                        ev.user_id,
                        ev.session_id,
                        ev.severity.as_str(),
                    );
                }
            }
        }
    });
}

fn spawn_telemetry_drain(mut rx: TelemetryReceiver, token: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                ev = rx.recv() => {
                    let Some(ev) = ev else { break };
                    if let Ok(json) = serde_json::to_string(&ev) {
                        tracing::debug!(telemetry = %json, "telemetry");
                    }
                }
            }
        }
    });
}
