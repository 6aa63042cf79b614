use std::collections::HashMap;
use std::path::Path;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{ConfigError, ConfigResult};
use crate::lexicon::LexiconSet;
use crate::types::{COMPOSITE_MAX, InterventionLevel};

/// Longest accepted cooldown or inactivity gap: 30 days.
pub const MAX_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

/// All tether scoring parameters.
///
/// Every constructor ends in [`TetherCfg::validate`], so a value of this type
/// that came out of a loader is always internally consistent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherCfg {
    // factor weights (α, β, γ, δ)
    pub w_frequency: f32,
    pub w_duration: f32,
    pub w_emotional: f32,
    pub w_isolation: f32,

    // lower bound of each level bucket; Normal starts at 0
    pub gentle_threshold: f32,
    pub moderate_threshold: f32,
    pub high_threshold: f32,

    // hysteresis & session boundaries
    pub hysteresis_cooldown_secs: u64,
    pub inactivity_gap_secs: u64,

    // trend analysis
    pub trend_lookback: usize,
    pub trend_slope_threshold: f32,
    pub trend_borderline_margin: f32,

    // outbox channel capacity
    pub escalation_buffer: usize,
    pub telemetry_buffer: usize,

    pub lexicon: LexiconSet,
}

impl Default for TetherCfg {
    fn default() -> Self {
        Self {
            w_frequency: 1.0,
            w_duration: 1.0,
            w_emotional: 1.0,
            w_isolation: 1.0,
            gentle_threshold: 20.0,
            moderate_threshold: 40.0,
            high_threshold: 70.0,
            hysteresis_cooldown_secs: 300,
            inactivity_gap_secs: 1800,
            trend_lookback: 20,
            trend_slope_threshold: 1.0,
            trend_borderline_margin: 5.0,
            escalation_buffer: 256,
            telemetry_buffer: 1024,
            lexicon: LexiconSet::english(),
        }
    }
}

impl TetherCfg {
    /// Reject contradictory or out-of-range settings.
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, value) in [
            ("w_frequency", self.w_frequency),
            ("w_duration", self.w_duration),
            ("w_emotional", self.w_emotional),
            ("w_isolation", self.w_isolation),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }

        let (g, m, h) = (self.gentle_threshold, self.moderate_threshold, self.high_threshold);
        let ordered = [g, m, h].iter().all(|t| t.is_finite())
            && 0.0 < g
            && g < m
            && m < h
            && h <= COMPOSITE_MAX;
        if !ordered {
            return Err(ConfigError::ThresholdOrder { gentle: g, moderate: m, high: h });
        }

        if self.inactivity_gap_secs == 0 {
            return Err(ConfigError::OutOfRange {
                key: "inactivity_gap_secs",
                reason: "must be > 0".into(),
            });
        }
        for (key, secs) in [
            ("inactivity_gap_secs", self.inactivity_gap_secs),
            ("hysteresis_cooldown_secs", self.hysteresis_cooldown_secs),
        ] {
            if secs > MAX_WINDOW_SECS {
                return Err(ConfigError::OutOfRange {
                    key,
                    reason: format!("must be <= {MAX_WINDOW_SECS}, got {secs}"),
                });
            }
        }
        if self.trend_lookback < 2 {
            return Err(ConfigError::OutOfRange {
                key: "trend_lookback",
                reason: format!("must be >= 2, got {}", self.trend_lookback),
            });
        }
        if !self.trend_slope_threshold.is_finite() || self.trend_slope_threshold <= 0.0 {
            return Err(ConfigError::OutOfRange {
                key: "trend_slope_threshold",
                reason: format!("must be > 0, got {}", self.trend_slope_threshold),
            });
        }
        if !self.trend_borderline_margin.is_finite() || self.trend_borderline_margin < 0.0 {
            return Err(ConfigError::OutOfRange {
                key: "trend_borderline_margin",
                reason: format!("must be >= 0, got {}", self.trend_borderline_margin),
            });
        }
        if self.escalation_buffer == 0 {
            return Err(ConfigError::OutOfRange {
                key: "escalation_buffer",
                reason: "must be >= 1".into(),
            });
        }
        if self.telemetry_buffer == 0 {
            return Err(ConfigError::OutOfRange {
                key: "telemetry_buffer",
                reason: "must be >= 1".into(),
            });
        }

        self.lexicon.validate()
    }

    /// Lower bound of `level`'s bucket.
    pub fn threshold(&self, level: InterventionLevel) -> f32 {
        match level {
            InterventionLevel::Normal => 0.0,
            InterventionLevel::Gentle => self.gentle_threshold,
            InterventionLevel::Moderate => self.moderate_threshold,
            InterventionLevel::High => self.high_threshold,
        }
    }

    pub fn hysteresis_cooldown(&self) -> TimeDelta {
        window(self.hysteresis_cooldown_secs)
    }

    pub fn inactivity_gap(&self) -> TimeDelta {
        window(self.inactivity_gap_secs)
    }

    /// Parse a full or partial JSON document; missing keys take defaults.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let mut cfg: Self = serde_json::from_str(json)?;
        cfg.lexicon = cfg.lexicon.prepared()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Load overrides from the `tether_config` table. An empty table is
    /// seeded with defaults.
    pub async fn load(pool: &PgPool) -> ConfigResult<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tether_config (\
             key TEXT PRIMARY KEY, value TEXT NOT NULL, description TEXT NOT NULL DEFAULT '')",
        )
        .execute(pool)
        .await?;

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM tether_config")
                .fetch_all(pool)
                .await?;

        if rows.is_empty() {
            let cfg = Self::default();
            cfg.seed(pool).await?;
            return Ok(cfg);
        }

        let map: HashMap<String, String> = rows.into_iter().collect();
        Self::from_map(&map)
    }

    /// Write all default values into `tether_config`.
    async fn seed(&self, pool: &PgPool) -> ConfigResult<()> {
        for (key, value, desc) in &self.to_entries() {
            sqlx::query(
                "INSERT INTO tether_config (key, value, description) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(desc)
            .execute(pool)
            .await?;
        }
        tracing::info!("tether_config seeded with defaults");
        Ok(())
    }

    /// Apply flat key/value overrides on top of the defaults. The lexicon is
    /// not expressible as a flat value and keeps the built-in set.
    pub fn from_map(m: &HashMap<String, String>) -> ConfigResult<Self> {
        let d = Self::default();
        let cfg = Self {
            w_frequency: get_or(m, "w_frequency", d.w_frequency)?,
            w_duration: get_or(m, "w_duration", d.w_duration)?,
            w_emotional: get_or(m, "w_emotional", d.w_emotional)?,
            w_isolation: get_or(m, "w_isolation", d.w_isolation)?,
            gentle_threshold: get_or(m, "gentle_threshold", d.gentle_threshold)?,
            moderate_threshold: get_or(m, "moderate_threshold", d.moderate_threshold)?,
            high_threshold: get_or(m, "high_threshold", d.high_threshold)?,
            hysteresis_cooldown_secs: get_or(m, "hysteresis_cooldown_secs", d.hysteresis_cooldown_secs)?,
            inactivity_gap_secs: get_or(m, "inactivity_gap_secs", d.inactivity_gap_secs)?,
            trend_lookback: get_or(m, "trend_lookback", d.trend_lookback)?,
            trend_slope_threshold: get_or(m, "trend_slope_threshold", d.trend_slope_threshold)?,
            trend_borderline_margin: get_or(m, "trend_borderline_margin", d.trend_borderline_margin)?,
            escalation_buffer: get_or(m, "escalation_buffer", d.escalation_buffer)?,
            telemetry_buffer: get_or(m, "telemetry_buffer", d.telemetry_buffer)?,
            lexicon: d.lexicon,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn to_entries(&self) -> Vec<(&'static str, String, &'static str)> {
        vec![
            ("w_frequency", self.w_frequency.to_string(), "Frequency factor weight"),
            ("w_duration", self.w_duration.to_string(), "Duration factor weight"),
            ("w_emotional", self.w_emotional.to_string(), "Emotional-dependency factor weight"),
            ("w_isolation", self.w_isolation.to_string(), "Isolation factor weight"),
            ("gentle_threshold", self.gentle_threshold.to_string(), "Lower bound of Gentle"),
            ("moderate_threshold", self.moderate_threshold.to_string(), "Lower bound of Moderate"),
            ("high_threshold", self.high_threshold.to_string(), "Lower bound of High"),
            ("hysteresis_cooldown_secs", self.hysteresis_cooldown_secs.to_string(), "Downgrade hold window after an upgrade"),
            ("inactivity_gap_secs", self.inactivity_gap_secs.to_string(), "Idle gap that closes a session"),
            ("trend_lookback", self.trend_lookback.to_string(), "Records considered by trend analysis"),
            ("trend_slope_threshold", self.trend_slope_threshold.to_string(), "Slope (points/record) that counts as rising or falling"),
            ("trend_borderline_margin", self.trend_borderline_margin.to_string(), "Points below a threshold a rising trend may lift"),
            ("escalation_buffer", self.escalation_buffer.to_string(), "Escalation channel capacity"),
            ("telemetry_buffer", self.telemetry_buffer.to_string(), "Telemetry channel capacity"),
        ]
    }
}

/// Seconds as a `TimeDelta`, capped at [`MAX_WINDOW_SECS`] for values that
/// bypassed `validate`.
fn window(secs: u64) -> TimeDelta {
    i64::try_from(secs.min(MAX_WINDOW_SECS))
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::zero())
}

fn get_or<T: std::str::FromStr>(
    map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> ConfigResult<T> {
    match map.get(key) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Parse {
            key: key.to_string(),
            value: v.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = TetherCfg::default();
        cfg.validate().unwrap();
        let ceiling = cfg.w_frequency * 30.0
            + cfg.w_duration * 20.0
            + cfg.w_emotional * 25.0
            + cfg.w_isolation * 25.0;
        assert!((ceiling - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn rejects_negative_weight() {
        let cfg = TetherCfg { w_duration: -0.5, ..Default::default() };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidWeight { name: "w_duration", .. })
        ));
    }

    #[test]
    fn rejects_nan_weight() {
        let cfg = TetherCfg { w_isolation: f32::NAN, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_threshold_order_violation() {
        let cfg = TetherCfg { gentle_threshold: 40.0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::ThresholdOrder { .. })));

        let cfg = TetherCfg { high_threshold: 120.0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::ThresholdOrder { .. })));

        let cfg = TetherCfg { gentle_threshold: 0.0, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_buffers_and_short_lookback() {
        assert!(TetherCfg { escalation_buffer: 0, ..Default::default() }.validate().is_err());
        assert!(TetherCfg { telemetry_buffer: 0, ..Default::default() }.validate().is_err());
        assert!(TetherCfg { trend_lookback: 1, ..Default::default() }.validate().is_err());
        assert!(TetherCfg { inactivity_gap_secs: 0, ..Default::default() }.validate().is_err());
    }

    #[test]
    fn rejects_windows_beyond_thirty_days() {
        for secs in [MAX_WINDOW_SECS + 1, 10_000_000_000_000_000, u64::MAX] {
            let gap = TetherCfg { inactivity_gap_secs: secs, ..Default::default() };
            assert!(matches!(
                gap.validate(),
                Err(ConfigError::OutOfRange { key: "inactivity_gap_secs", .. })
            ));
            let cooldown = TetherCfg { hysteresis_cooldown_secs: secs, ..Default::default() };
            assert!(matches!(
                cooldown.validate(),
                Err(ConfigError::OutOfRange { key: "hysteresis_cooldown_secs", .. })
            ));
        }
        let edge = TetherCfg {
            inactivity_gap_secs: MAX_WINDOW_SECS,
            hysteresis_cooldown_secs: MAX_WINDOW_SECS,
            ..Default::default()
        };
        edge.validate().unwrap();
        assert_eq!(edge.inactivity_gap(), TimeDelta::days(30));
    }

    #[test]
    fn durations_never_wrap_negative() {
        let cfg = TetherCfg { inactivity_gap_secs: u64::MAX, ..Default::default() };
        assert!(cfg.inactivity_gap() > TimeDelta::zero());
        assert_eq!(cfg.inactivity_gap(), TimeDelta::seconds(MAX_WINDOW_SECS as i64));
    }

    #[test]
    fn from_map_rejects_oversized_gap() {
        let err = TetherCfg::from_map(&map(&[("inactivity_gap_secs", "18446744073709551615")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key: "inactivity_gap_secs", .. }));
    }

    #[test]
    fn from_map_applies_overrides() {
        let cfg = TetherCfg::from_map(&map(&[
            ("gentle_threshold", "15"),
            ("hysteresis_cooldown_secs", "60"),
            ("unknown_key", "ignored"),
        ]))
        .unwrap();
        assert_eq!(cfg.gentle_threshold, 15.0);
        assert_eq!(cfg.hysteresis_cooldown_secs, 60);
        assert_eq!(cfg.moderate_threshold, 40.0);
    }

    #[test]
    fn from_map_rejects_garbage() {
        let err = TetherCfg::from_map(&map(&[("trend_lookback", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref key, .. } if key == "trend_lookback"));
    }

    #[test]
    fn from_map_validates() {
        let err = TetherCfg::from_map(&map(&[("moderate_threshold", "80")])).unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdOrder { .. }));
    }

    #[test]
    fn entries_roundtrip_through_from_map() {
        let custom = TetherCfg {
            w_emotional: 0.5,
            high_threshold: 65.0,
            trend_lookback: 8,
            ..Default::default()
        };
        let m: HashMap<String, String> = custom
            .to_entries()
            .into_iter()
            .map(|(k, v, _)| (k.to_string(), v))
            .collect();
        let back = TetherCfg::from_map(&m).unwrap();
        assert_eq!(back.w_emotional, 0.5);
        assert_eq!(back.high_threshold, 65.0);
        assert_eq!(back.trend_lookback, 8);
    }

    #[test]
    fn from_json_partial_document() {
        let cfg = TetherCfg::from_json(r#"{"inactivity_gap_secs": 600}"#).unwrap();
        assert_eq!(cfg.inactivity_gap_secs, 600);
        assert_eq!(cfg.lexicon.locale, "en");
    }

    #[test]
    fn from_json_rejects_bad_values() {
        assert!(TetherCfg::from_json(r#"{"w_frequency": -1}"#).is_err());
        assert!(matches!(
            TetherCfg::from_json("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TetherCfg::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn from_file_with_custom_lexicon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.json");
        std::fs::write(
            &path,
            r#"{
                "high_threshold": 75,
                "lexicon": {
                    "locale": "en-x",
                    "emotional": [{"phrase": "Need YOU", "weight": 5}],
                    "isolation": [],
                    "crisis": [{"phrase": "hurt myself", "severity": "explicit_intent"}]
                }
            }"#,
        )
        .unwrap();
        let cfg = TetherCfg::from_file(&path).unwrap();
        assert_eq!(cfg.high_threshold, 75.0);
        assert_eq!(cfg.lexicon.locale, "en-x");
        assert_eq!(cfg.lexicon.emotional[0].phrase, "need you");
    }

    #[test]
    fn threshold_lookup() {
        let cfg = TetherCfg::default();
        assert_eq!(cfg.threshold(InterventionLevel::Normal), 0.0);
        assert_eq!(cfg.threshold(InterventionLevel::High), 70.0);
    }
}
