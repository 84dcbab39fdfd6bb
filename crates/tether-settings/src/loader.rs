//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If `~/.tether/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `TETHER_*` environment variable overrides
//! 4. Validate cross-field invariants

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::TetherSettings;

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a failed
/// [`TetherSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let mut settings = read_file_layer(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced, and nulls in
/// `source` are skipped.
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

/// Apply `TETHER_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning.
pub fn apply_overrides(settings: &mut TetherSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = Env { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.ranged("TETHER_PORT", 1_u16, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.ranged("TETHER_MAX_SEND_QUEUE", 1_usize, 100_000) {
        settings.server.max_send_queue = v;
    }
    if let Some(v) = env.ranged("TETHER_PING_INTERVAL_SECS", 1_u64, 3_600) {
        settings.server.ping_interval_secs = v;
    }
    if let Some(v) = env.ranged("TETHER_READ_TIMEOUT_SECS", 1_u64, 3_600) {
        settings.server.read_timeout_secs = v;
    }

    // ── Sync ────────────────────────────────────────────────────────
    if let Some(v) = env.ranged("TETHER_WRITE_THROTTLE_MS", 0_u64, 60_000) {
        settings.sync.write_throttle_ms = v;
    }
    if let Some(v) = env.ranged("TETHER_PUBLISH_THROTTLE_MS", 0_u64, 60_000) {
        settings.sync.publish_throttle_ms = v;
    }
    if let Some(v) = env.ranged("TETHER_READINESS_TIMEOUT_SECS", 1_u64, 3_600) {
        settings.sync.readiness_timeout_secs = v;
    }

    // ── Auth and logging ────────────────────────────────────────────
    if let Some(v) = env.string("TETHER_RUNNER_TOKEN") {
        settings.auth.runner_token = Some(v);
    }
    if let Some(v) = env.string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("TETHER_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a number within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let val = self.string(name)?;
        let result = parse_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn write_settings(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override_keeps_siblings() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8080);
    }

    #[test]
    fn partial_file_overrides() {
        let (_dir, path) =
            write_settings(r#"{"server": {"port": 9090}, "sync": {"writeThrottleMs": 500}}"#);
        let settings = read_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.max_send_queue, 100);
        assert_eq!(settings.sync.write_throttle_ms, 500);
        assert_eq!(settings.sync.publish_throttle_ms, 50);
    }

    #[test]
    fn invalid_json_is_error() {
        let (_dir, path) = write_settings("not valid json");
        assert!(matches!(read_file_layer(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn invalid_combination_fails_validation() {
        let (_dir, path) =
            write_settings(r#"{"server": {"pingIntervalSecs": 90, "readTimeoutSecs": 60}}"#);
        let result = read_file_layer(&path).and_then(|s| s.validate());
        assert!(matches!(result, Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn zero_ping_interval_in_file_is_rejected() {
        let (_dir, path) = write_settings(r#"{"server": {"pingIntervalSecs": 0}}"#);
        let result = load_settings_from_path(&path);
        assert!(matches!(result, Err(SettingsError::InvalidValue(_))));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply_over_file() {
        let mut settings = TetherSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("TETHER_PORT", "9999"),
                ("TETHER_WRITE_THROTTLE_MS", "0"),
                ("TETHER_RUNNER_TOKEN", "secret"),
                ("TETHER_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.port, 9999);
        assert_eq!(settings.sync.write_throttle_ms, 0);
        assert_eq!(settings.auth.runner_token.as_deref(), Some("secret"));
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = TetherSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("TETHER_PORT", "0"),
                ("TETHER_MAX_SEND_QUEUE", "lots"),
                ("TETHER_LOG_JSON", "maybe"),
                ("TETHER_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.max_send_queue, 100);
        assert!(!settings.logging.json);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_range("9090", 1_u16, u16::MAX), Some(9090));
        assert_eq!(parse_range("0", 1_u16, u16::MAX), None);
        assert_eq!(parse_range("99999", 1_u16, u16::MAX), None);
        assert_eq!(parse_range(" 200 ", 0_u64, 1000), Some(200));
        assert_eq!(parse_range::<u64>("abc", 0, 1000), None);
    }
}
