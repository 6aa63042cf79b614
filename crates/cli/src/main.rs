mod repl;
mod replay;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tether_core::config::TetherCfg;
use tether_core::lexicon::LexiconSet;
use tether_core::Engine;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_TIMEOUT_SECS: u64 = 3;
const LOG_FILE: &str = "/tmp/tether.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing goes to a file so it never interleaves with the prompt.
    if std::env::var("RUST_LOG").is_ok() {
        let file = std::fs::File::create(LOG_FILE)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    }

    let mut args = std::env::args().skip(1);
    let replay_path = match args.next().as_deref() {
        None => None,
        Some("replay") => match args.next() {
            Some(path) => Some(PathBuf::from(path)),
            None => anyhow::bail!("usage: tether replay <file.jsonl>"),
        },
        Some(other) => anyhow::bail!("unknown command `{other}`; usage: tether [replay <file.jsonl>]"),
    };

    let mut startup_notice: Option<String> = None;
    let cfg = load_config(&mut startup_notice).await?;
    let (engine, esc_rx, tel_rx) = Engine::new(cfg)?;
    let engine = Arc::new(engine);

    match replay_path {
        Some(path) => replay::run(&engine, &path, esc_rx, tel_rx),
        None => repl::run(engine, esc_rx, tel_rx, startup_notice).await,
    }
}

/// `TETHER_CONFIG` file, else the `tether_config` table, else defaults.
/// `TETHER_LEXICON` replaces the phrase tables on top of either.
async fn load_config(notice: &mut Option<String>) -> anyhow::Result<TetherCfg> {
    let mut cfg = if let Ok(path) = std::env::var("TETHER_CONFIG") {
        tracing::info!(path = %path, "loading config file");
        TetherCfg::from_file(&path)?
    } else if let Ok(url) = std::env::var("DATABASE_URL") {
        let mut fallback = |reason: String| {
            tracing::warn!(reason = %reason, "using default config");
            *notice = Some(format!("note: {reason}; running with default settings."));
            TetherCfg::default()
        };
        match tokio::time::timeout(
            Duration::from_secs(DB_CONNECT_TIMEOUT_SECS),
            sqlx::postgres::PgPoolOptions::new()
                .max_connections(2)
                .connect(&url),
        )
        .await
        {
            Ok(Ok(pool)) => {
                let cfg = TetherCfg::load(&pool).await?;
                pool.close().await;
                cfg
            }
            Ok(Err(e)) => fallback(format!("cannot connect to DATABASE_URL ({e})")),
            Err(_) => fallback(format!(
                "database connect timed out ({DB_CONNECT_TIMEOUT_SECS}s)"
            )),
        }
    } else {
        TetherCfg::default()
    };

    if let Ok(path) = std::env::var("TETHER_LEXICON") {
        cfg.lexicon = LexiconSet::from_file(&path)?;
        tracing::info!(path = %path, locale = %cfg.lexicon.locale, "lexicon loaded");
    }
    cfg.validate()?;
    Ok(cfg)
}
