//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BridgeSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `V8BRIDGE_*` environment variable overrides
//!
//! Command-line flags are applied by the binary on top of the result.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{BridgeSettings, SessionPolicy};

/// Resolve the path to the settings file (`~/.v8bridge/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".v8bridge").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BridgeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BridgeSettings> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// Load settings resolving environment variables through `env`.
pub fn load_settings_with<F>(path: &Path, env: F) -> Result<BridgeSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(BridgeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value =
            serde_json::from_str(&content).map_err(|source| SettingsError::Syntax {
                path: path.to_path_buf(),
                source,
            })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BridgeSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides, reading variables through `env`.
///
/// Invalid values are ignored with a warning and the file/default value kept.
pub fn apply_env_overrides<F>(settings: &mut BridgeSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup: env };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("V8BRIDGE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("V8BRIDGE_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.policy("V8BRIDGE_POLICY") {
        settings.server.policy = v;
    }

    // ── Debuggee ────────────────────────────────────────────────────
    if let Some(v) = env.string("V8BRIDGE_DEBUGGER_HOST") {
        settings.debuggee.host = v;
    }
    if let Some(v) = env.u16("V8BRIDGE_DEBUGGER_PORT", 1, 65535) {
        settings.debuggee.port = v;
    }
    if let Some(v) = env.bool("V8BRIDGE_RECONNECT") {
        settings.debuggee.reconnect_enabled = v;
    }
    if let Some(v) = env.u64("V8BRIDGE_RECONNECT_INTERVAL_MS", 10, 600_000) {
        settings.debuggee.reconnect_interval_ms = v;
    }

    // ── Process ─────────────────────────────────────────────────────
    if let Some(v) = env.bool("V8BRIDGE_MANAGED") {
        settings.process.managed = v;
    }
    if let Some(v) = env.string("V8BRIDGE_RUNTIME") {
        settings.process.runtime = v;
    }
    if let Some(v) = env.string("V8BRIDGE_SCRIPT") {
        settings.process.script_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env.u64("V8BRIDGE_SETTLE_DELAY_MS", 0, 60_000) {
        settings.process.settle_delay_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("V8BRIDGE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("V8BRIDGE_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

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

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn policy(&self, name: &str) -> Option<SessionPolicy> {
        let val = self.string(name)?;
        match val.parse() {
            Ok(policy) => Some(policy),
            Err(e) => {
                tracing::warn!(key = name, value = %val, error = %e, "invalid policy env var, ignoring");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 3858, "host": "127.0.0.1"}});
        let source = serde_json::json!({"server": {"port": 9229}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9229);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"runtimeArgs": ["--debug-brk={port}"]});
        let source = serde_json::json!({"runtimeArgs": ["--inspect"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["runtimeArgs"], serde_json::json!(["--inspect"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_with(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings.server.port, 3858);
        assert_eq!(settings.debuggee.port, 5858);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"debuggee": {"port": 9229, "reconnectEnabled": true}, "server": {"policy": "perSession"}}"#,
        )
        .unwrap();

        let settings = load_settings_with(&path, no_env).unwrap();
        assert_eq!(settings.debuggee.port, 9229);
        assert!(settings.debuggee.reconnect_enabled);
        assert_eq!(settings.debuggee.reconnect_interval_ms, 1_000);
        assert_eq!(settings.server.policy, SessionPolicy::PerSession);
        assert_eq!(settings.server.port, 3858);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_with(&path, no_env);
        match result.unwrap_err() {
            SettingsError::Syntax { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn load_wrong_type_is_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"debuggee": {"port": "5858"}}"#).unwrap();

        let result = load_settings_with(&path, no_env);
        assert!(matches!(result.unwrap_err(), SettingsError::Shape(_)));
    }

    #[test]
    fn load_directory_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_settings_with(dir.path(), no_env);
        assert!(matches!(result.unwrap_err(), SettingsError::Read { .. }));
    }

    #[test]
    fn load_rejects_invalid_combination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"debuggee": {"reconnectEnabled": true, "reconnectIntervalMs": 0}}"#,
        )
        .unwrap();

        let result = load_settings_with(&path, no_env);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 4000}}"#).unwrap();

        let env = env_from(&[
            ("V8BRIDGE_PORT", "4100"),
            ("V8BRIDGE_DEBUGGER_PORT", "9229"),
            ("V8BRIDGE_RECONNECT", "yes"),
            ("V8BRIDGE_MANAGED", "on"),
            ("V8BRIDGE_SCRIPT", "/srv/app.js"),
            ("V8BRIDGE_POLICY", "per-session"),
        ]);
        let settings = load_settings_with(&path, env).unwrap();
        assert_eq!(settings.server.port, 4100);
        assert_eq!(settings.debuggee.port, 9229);
        assert!(settings.debuggee.reconnect_enabled);
        assert!(settings.process.managed);
        assert_eq!(settings.process.script_path, Some(PathBuf::from("/srv/app.js")));
        assert_eq!(settings.server.policy, SessionPolicy::PerSession);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut settings = BridgeSettings::default();
        apply_env_overrides(
            &mut settings,
            env_from(&[
                ("V8BRIDGE_DEBUGGER_PORT", "0"),
                ("V8BRIDGE_RECONNECT", "maybe"),
                ("V8BRIDGE_POLICY", "shared"),
                ("V8BRIDGE_HOST", ""),
            ]),
        );
        assert_eq!(settings.debuggee.port, 5858);
        assert!(!settings.debuggee.reconnect_enabled);
        assert_eq!(settings.server.policy, SessionPolicy::Exclusive);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_values() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("5858", 1, 65535), Some(5858));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("1000", 10, 600_000), Some(1000));
        assert_eq!(parse_u64_range("5", 10, 600_000), None);
        assert_eq!(parse_u64_range("abc", 10, 600_000), None);
    }

    #[test]
    fn settings_path_under_home() {
        let path = settings_path();
        assert!(path.ends_with(".v8bridge/settings.json"));
    }
}
