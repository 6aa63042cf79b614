//! Real-time dependency scoring and intervention engine.
//!
//! Events flow `extract` → `scoring` → `intervention` inside [`Engine`];
//! crisis notices and telemetry leave through the [`io::outbox`] channels.

pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod intervention;
pub mod io;
pub mod lexicon;
pub mod scoring;
pub mod types;

pub use config::TetherCfg;
pub use engine::Engine;
pub use error::{ConfigError, DeliveryWarning};
