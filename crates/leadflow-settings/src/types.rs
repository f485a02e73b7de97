//! Settings schema.
//!
//! All structs deserialize from camelCase JSON and fill missing keys from
//! their `Default` impls, so a settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeadflowSettings {
    /// Database location and pool tuning.
    pub database: DatabaseSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Automatic assignment.
    pub assignment: AssignmentSettings,
    /// Lead scoring.
    pub scoring: ScoringSettings,
    /// Status transitions and sweeps.
    pub lifecycle: LifecycleSettings,
}

/// Database settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// `SQLite` file path. A leading `~/` expands to the home directory.
    pub path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// How long a writer waits on a locked database before giving up.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "~/.leadflow/leadflow.db".to_string(),
            pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single line.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Assignment settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssignmentSettings {
    /// IANA timezone for business-hour windows whose rule names none (or an
    /// unknown one).
    pub default_timezone: String,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            default_timezone: "UTC".to_string(),
        }
    }
}

/// Scoring settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringSettings {
    /// Upper bound of `lead_score`.
    pub max_score: i64,
    /// Unforced rescoring within this many seconds of the last score is skipped.
    pub rescore_cooldown_secs: u64,
    /// Run one transition pass after each computed score.
    pub evaluate_transitions_after_scoring: bool,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            max_score: 100,
            rescore_cooldown_secs: 3_600,
            evaluate_transitions_after_scoring: true,
        }
    }
}

/// Lifecycle settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleSettings {
    /// Contacts processed in parallel by a sweep.
    pub sweep_concurrency: usize,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            sweep_concurrency: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = LeadflowSettings::default();
        assert_eq!(s.database.pool_size, 8);
        assert_eq!(s.logging.level, "info");
        assert_eq!(s.assignment.default_timezone, "UTC");
        assert_eq!(s.scoring.max_score, 100);
        assert_eq!(s.scoring.rescore_cooldown_secs, 3_600);
        assert!(s.scoring.evaluate_transitions_after_scoring);
        assert_eq!(s.lifecycle.sweep_concurrency, 8);
    }

    #[test]
    fn default_json_shape() {
        let json = serde_json::to_value(LeadflowSettings::default()).unwrap();
        insta::assert_json_snapshot!(json, @r#"
        {
          "assignment": {
            "defaultTimezone": "UTC"
          },
          "database": {
            "busyTimeoutMs": 5000,
            "path": "~/.leadflow/leadflow.db",
            "poolSize": 8
          },
          "lifecycle": {
            "sweepConcurrency": 8
          },
          "logging": {
            "format": "compact",
            "level": "info"
          },
          "scoring": {
            "evaluateTransitionsAfterScoring": true,
            "maxScore": 100,
            "rescoreCooldownSecs": 3600
          }
        }
        "#);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: LeadflowSettings =
            serde_json::from_str(r#"{"scoring": {"maxScore": 50}}"#).unwrap();
        assert_eq!(s.scoring.max_score, 50);
        assert_eq!(s.scoring.rescore_cooldown_secs, 3_600);
        assert_eq!(s.database.pool_size, 8);
    }
}
