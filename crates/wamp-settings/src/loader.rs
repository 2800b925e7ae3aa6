//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WampSettings::default()`]
//! 2. If `~/.wamp/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `WAMP_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::WampSettings;

/// Resolve the path to the settings file (`~/.wamp/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wamp").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WampSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WampSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<WampSettings> {
    let defaults = serde_json::to_value(WampSettings::default())?;

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

/// Apply `WAMP_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut WampSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply `WAMP_*` overrides using `lookup` to resolve variable names.
///
/// Invalid or out-of-range values are logged and ignored.
pub fn apply_overrides<F>(settings: &mut WampSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Transport ───────────────────────────────────────────────────
    if let Some(v) = env.string("WAMP_HOST") {
        settings.transport.host = v;
    }
    if let Some(v) = env.u16("WAMP_PORT", 0, 65535) {
        settings.transport.port = v;
    }
    if let Some(v) = env.bool("WAMP_NODELAY") {
        settings.transport.nodelay = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.u64("WAMP_HEARTBEAT_INTERVAL", 0, 3600) {
        settings.session.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.u64("WAMP_HEARTBEAT_TIMEOUT", 1, 86_400) {
        settings.session.heartbeat_timeout_secs = v;
    }
    if let Some(v) = env.u64("WAMP_HANDSHAKE_TIMEOUT", 1, 3600) {
        settings.session.handshake_timeout_secs = v;
    }
    if let Some(v) = env.usize("WAMP_MAX_FRAME_LEN", 64, u32::MAX as usize) {
        settings.session.max_frame_len = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("WAMP_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("WAMP_LOG_JSON") {
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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Variable readers ────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"session": {"a": 1, "b": 2}});
        let source = serde_json::json!({"session": {"a": 10}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["session"]["a"], 10);
        assert_eq!(merged["session"]["b"], 2);
    }

    #[test]
    fn merge_skips_null() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_replaces_arrays() {
        let merged = deep_merge(
            serde_json::json!({"a": [1, 2, 3]}),
            serde_json::json!({"a": [9]}),
        );
        assert_eq!(merged["a"], serde_json::json!([9]));
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_file_layer(&dir.path().join("absent.json")).unwrap();
        assert_eq!(s.transport.port, 55555);
        assert_eq!(s.session.heartbeat_interval_secs, 30);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"transport": {"port": 9000}, "session": {"heartbeatIntervalSecs": 5}}"#,
        )
        .unwrap();

        let s = load_file_layer(&path).unwrap();
        assert_eq!(s.transport.port, 9000);
        assert_eq!(s.transport.host, "127.0.0.1");
        assert_eq!(s.session.heartbeat_interval_secs, 5);
        assert_eq!(s.session.heartbeat_timeout_secs, 90);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_file_layer(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut s = WampSettings::default();
        apply_overrides(
            &mut s,
            lookup_from(&[
                ("WAMP_HOST", "0.0.0.0"),
                ("WAMP_PORT", "8080"),
                ("WAMP_HEARTBEAT_INTERVAL", "0"),
                ("WAMP_MAX_FRAME_LEN", "4096"),
                ("WAMP_LOG_LEVEL", "debug"),
                ("WAMP_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(s.transport.host, "0.0.0.0");
        assert_eq!(s.transport.port, 8080);
        assert_eq!(s.session.heartbeat_interval_secs, 0);
        assert_eq!(s.session.max_frame_len, 4096);
        assert_eq!(s.logging.level, "debug");
        assert!(s.logging.json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut s = WampSettings::default();
        apply_overrides(
            &mut s,
            lookup_from(&[
                ("WAMP_PORT", "99999"),
                ("WAMP_HEARTBEAT_TIMEOUT", "0"),
                ("WAMP_NODELAY", "maybe"),
                ("WAMP_HOST", ""),
            ]),
        );
        assert_eq!(s.transport.port, 55555);
        assert_eq!(s.session.heartbeat_timeout_secs, 90);
        assert!(s.transport.nodelay);
        assert_eq!(s.transport.host, "127.0.0.1");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("80", 1, 65535), Some(80));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
        assert_eq!(parse_usize_range("64", 64, 128), Some(64));
        assert_eq!(parse_usize_range("129", 64, 128), None);
    }
}
