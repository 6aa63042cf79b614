use serde::Serialize;
use thiserror::Error;

/// Configuration rejected at load time.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("weight `{name}` must be finite and non-negative, got {value}")]
    InvalidWeight { name: &'static str, value: f32 },

    #[error("level thresholds must satisfy 0 < gentle < moderate < high <= 100, got {gentle} / {moderate} / {high}")]
    ThresholdOrder { gentle: f32, moderate: f32, high: f32 },

    #[error("`{key}` out of range: {reason}")]
    OutOfRange { key: &'static str, reason: String },

    #[error("cannot parse `{key}` from {value:?}")]
    Parse { key: String, value: String },

    #[error("lexicon `{locale}`: {reason}")]
    Lexicon { locale: String, reason: String },

    #[error("config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config table: {0}")]
    Db(#[from] sqlx::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Which downstream sink an event was meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Escalation,
    Telemetry,
}

/// Hand-off failure reported back to the caller instead of failing the ingest.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum DeliveryWarning {
    /// Channel full; event dropped.
    #[error("{sink:?} sink backlogged, event dropped")]
    Backpressure { sink: SinkKind },

    /// Receiver gone or never attached.
    #[error("{sink:?} sink unavailable")]
    Unavailable { sink: SinkKind },
}

impl DeliveryWarning {
    pub fn sink(&self) -> SinkKind {
        match self {
            Self::Backpressure { sink } | Self::Unavailable { sink } => *sink,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_error_names_all_bounds() {
        let e = ConfigError::ThresholdOrder { gentle: 40.0, moderate: 40.0, high: 70.0 };
        let msg = e.to_string();
        assert!(msg.contains("40 / 40 / 70"), "{msg}");
    }

    #[test]
    fn delivery_warning_reports_sink() {
        let w = DeliveryWarning::Unavailable { sink: SinkKind::Escalation };
        assert_eq!(w.sink(), SinkKind::Escalation);
        let json = serde_json::to_value(w).unwrap();
        assert_eq!(json["warning"], "unavailable");
        assert_eq!(json["sink"], "escalation");
    }
}
