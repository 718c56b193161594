//! Layered settings: compiled defaults, then `~/.tars/settings.json`, then
//! `TARS_*` environment variables, then validation.
//!
//! The file only needs the keys it changes. Objects merge key by key, any
//! other JSON value replaces the default outright, and `null` leaves the
//! default alone.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{DuplicateSessionPolicy, TarsSettings};

/// `~/.tars/settings.json`, or under `/tmp` when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    home.join(".tars").join("settings.json")
}

/// [`load_settings_from_path`] on [`settings_path`].
pub fn load_settings() -> Result<TarsSettings> {
    load_settings_from_path(&settings_path())
}

/// Build settings from every layer. A missing file is not an error.
pub fn load_settings_from_path(path: &Path) -> Result<TarsSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn read_layers(path: &Path) -> Result<TarsSettings> {
    let malformed = |source| SettingsError::Malformed {
        path: path.to_path_buf(),
        source,
    };

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(TarsSettings::default());
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    debug!(path = %path.display(), "merging settings file");

    let overlay: Value = serde_json::from_str(&text).map_err(malformed)?;
    let base = serde_json::to_value(TarsSettings::default()).map_err(malformed)?;
    serde_json::from_value(deep_merge(base, overlay)).map_err(malformed)
}

/// Overlay `source` onto `target`, recursing into objects.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, source) => source,
    }
}

/// Reject settings the server cannot run with.
pub fn validate(settings: &TarsSettings) -> Result<()> {
    let server = &settings.server;
    if server.heartbeat_interval_secs == 0 {
        return Err(SettingsError::invalid("server.heartbeatIntervalSecs", "must be positive"));
    }
    if server.heartbeat_timeout_secs <= server.heartbeat_interval_secs {
        return Err(SettingsError::invalid(
            "server.heartbeatTimeoutSecs",
            format!(
                "{} must exceed heartbeatIntervalSecs ({})",
                server.heartbeat_timeout_secs, server.heartbeat_interval_secs
            ),
        ));
    }
    if server.outbound_buffer == 0 {
        return Err(SettingsError::invalid("server.outboundBuffer", "must be positive"));
    }
    if server.publish_interval_secs == 0 {
        return Err(SettingsError::invalid("server.publishIntervalSecs", "must be positive"));
    }
    if settings.host.docker_bin.trim().is_empty() {
        return Err(SettingsError::invalid("host.dockerBin", "is empty"));
    }
    if settings.host.apps_dir.trim().is_empty() {
        return Err(SettingsError::invalid("host.appsDir", "is empty"));
    }
    Ok(())
}

/// Fold `TARS_*` variables over `settings`.
///
/// A variable that does not parse, or falls outside its range, is logged and
/// skipped so the file or default value stands.
pub fn apply_env_overrides(settings: &mut TarsSettings) {
    let server = &mut settings.server;
    override_with(&mut server.host, env_text("TARS_HOST"));
    override_with(&mut server.port, env_in_range("TARS_PORT", 1..=u16::MAX));
    override_with(&mut server.max_connections, env_in_range("TARS_MAX_CONNECTIONS", 1..=10_000));
    override_with(&mut server.heartbeat_interval_secs, env_in_range("TARS_HEARTBEAT_INTERVAL", 1..=3600));
    override_with(&mut server.publish_interval_secs, env_in_range("TARS_PUBLISH_INTERVAL", 1..=3600));
    override_with(
        &mut server.duplicate_sessions,
        env_parsed("TARS_DUPLICATE_SESSIONS", DuplicateSessionPolicy::parse),
    );

    let host = &mut settings.host;
    override_with(&mut host.docker_bin, env_text("TARS_DOCKER_BIN"));
    override_with(&mut host.command_timeout_secs, env_in_range("TARS_COMMAND_TIMEOUT", 1..=600));
    override_with(&mut host.apps_dir, env_text("TARS_APPS_DIR"));

    let logging = &mut settings.logging;
    override_with(&mut logging.level, env_text("TARS_LOG_LEVEL"));
    override_with(&mut logging.json, env_parsed("TARS_LOG_JSON", parse_bool));
}

fn override_with<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

// ── Parsers ──

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `val` as `T` and keep it only inside `range`.
pub fn parse_in_range<T>(val: &str, range: &RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

// ── Environment ──

fn env_text(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T>(name: &'static str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    let raw = env_text(name)?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!(key = name, value = %raw, "unusable environment override, ignoring");
    }
    parsed
}

fn env_in_range<T>(name: &'static str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    env_parsed(name, |raw| parse_in_range(raw, &range))
}
