//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LeadflowSettings::default()`]
//! 2. If `~/.leadflow/settings.json` exists, deep-merge it over the defaults
//! 3. Apply `LEADFLOW_*` environment overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LeadflowSettings, LogFormat};

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// Path of the settings file (`~/.leadflow/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join(".leadflow").join("settings.json")
}

/// Expand a leading `~/` in a configured path.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

/// Load settings from the default path.
pub fn load_settings() -> Result<LeadflowSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`, falling back to defaults when it is absent.
pub fn load_settings_from_path(path: &Path) -> Result<LeadflowSettings> {
    let defaults = serde_json::to_value(LeadflowSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "no settings file, using defaults");
        defaults
    };

    let mut settings: LeadflowSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge: objects merge per key, everything else is replaced,
/// and `null` in `source` keeps the `target` value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject settings the engine cannot run with.
pub fn validate(settings: &LeadflowSettings) -> Result<()> {
    if settings.scoring.max_score <= 0 {
        return Err(SettingsError::InvalidValue(format!(
            "scoring.maxScore must be positive, got {}",
            settings.scoring.max_score
        )));
    }
    if settings.database.pool_size == 0 {
        return Err(SettingsError::InvalidValue(
            "database.poolSize must be at least 1".into(),
        ));
    }
    if settings.lifecycle.sweep_concurrency == 0 {
        return Err(SettingsError::InvalidValue(
            "lifecycle.sweepConcurrency must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Apply `LEADFLOW_*` overrides. Unparseable values are logged and ignored.
pub fn apply_env_overrides(settings: &mut LeadflowSettings) {
    // ── Database ────────────────────────────────────────────────────
    if let Some(v) = read_env_string("LEADFLOW_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = read_env_u64("LEADFLOW_DB_POOL_SIZE", 1, 64) {
        settings.database.pool_size = u32::try_from(v).unwrap_or(settings.database.pool_size);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("LEADFLOW_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("LEADFLOW_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "LEADFLOW_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }

    // ── Engine ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("LEADFLOW_DEFAULT_TIMEZONE") {
        settings.assignment.default_timezone = v;
    }
    if let Some(v) = read_env_i64("LEADFLOW_MAX_SCORE", 1, 1_000_000) {
        settings.scoring.max_score = v;
    }
    if let Some(v) = read_env_u64("LEADFLOW_RESCORE_COOLDOWN_SECS", 0, 31_536_000) {
        settings.scoring.rescore_cooldown_secs = v;
    }
    if let Some(v) = read_env_bool("LEADFLOW_AUTO_TRANSITIONS") {
        settings.scoring.evaluate_transitions_after_scoring = v;
    }
    if let Some(v) = read_env_u64("LEADFLOW_SWEEP_CONCURRENCY", 1, 256) {
        settings.lifecycle.sweep_concurrency =
            usize::try_from(v).unwrap_or(settings.lifecycle.sweep_concurrency);
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse an `i64` within an inclusive range.
pub fn parse_i64_range(val: &str, min: i64, max: i64) -> Option<i64> {
    let n: i64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a log format name.
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "compact" | "text" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let parsed = parse_bool(&val);
    if parsed.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    parsed
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let parsed = parse_u64_range(&val, min, max);
    if parsed.is_none() {
        warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    parsed
}

fn read_env_i64(name: &str, min: i64, max: i64) -> Option<i64> {
    let val = std::env::var(name).ok()?;
    let parsed = parse_i64_range(&val, min, max);
    if parsed.is_none() {
        warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_nested_keeps_siblings() {
        let target = serde_json::json!({"scoring": {"maxScore": 100, "rescoreCooldownSecs": 3600}});
        let source = serde_json::json!({"scoring": {"maxScore": 250}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["scoring"]["maxScore"], 250);
        assert_eq!(merged["scoring"]["rescoreCooldownSecs"], 3600);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_replaces_arrays_and_primitives() {
        let merged = deep_merge(
            serde_json::json!({"a": [1, 2], "b": "x"}),
            serde_json::json!({"a": [3], "b": {"c": true}}),
        );
        assert_eq!(merged["a"], serde_json::json!([3]));
        assert_eq!(merged["b"]["c"], true);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/leadflow.json")).unwrap();
        assert_eq!(settings.scoring.max_score, LeadflowSettings::default().scoring.max_score);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"database": {"poolSize": 2}, "lifecycle": {"sweepConcurrency": 3}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.database.pool_size, 2);
        assert_eq!(settings.lifecycle.sweep_concurrency, 3);
        assert_eq!(settings.database.busy_timeout_ms, 5_000);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"scoring": {"maxScore": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u64_range("8", 1, 256), Some(8));
        assert_eq!(parse_u64_range("0", 1, 256), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
        assert_eq!(parse_i64_range(" 250 ", 1, 1000), Some(250));
        assert_eq!(parse_i64_range("abc", 1, 1000), None);
    }

    #[test]
    fn parse_log_formats() {
        assert_eq!(parse_log_format("JSON"), Some(LogFormat::Json));
        assert_eq!(parse_log_format("text"), Some(LogFormat::Compact));
        assert_eq!(parse_log_format("xml"), None);
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home("/var/db.sqlite"), PathBuf::from("/var/db.sqlite"));
        assert!(expand_home("~/x.db").ends_with("x.db"));
        assert!(!expand_home("~/x.db").starts_with("~"));
    }
}
