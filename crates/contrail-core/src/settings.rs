//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If `~/.contrail/settings.json` exists, deep-merge user values over
//!    defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::CoreError;
use crate::retry::RetryConfig;

/// Auth platform connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    /// Base URL of the hosted auth platform.
    pub base_url: String,
    /// Refresh tokens this many seconds before expiry.
    pub token_expiry_buffer_secs: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            base_url: "https://auth.contrail.app".to_string(),
            token_expiry_buffer_secs: 300,
        }
    }
}

/// Local persistence settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    /// SQLite database path.
    pub db_path: String,
    /// Client state file path.
    pub state_path: String,
    /// Server-side session lifetime in hours.
    pub session_ttl_hours: i64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        let dir = contrail_dir();
        Self {
            db_path: dir.join("contrail.db").to_string_lossy().into_owned(),
            state_path: dir.join("state.json").to_string_lossy().into_owned(),
            session_ttl_hours: 720,
        }
    }
}

/// Reconciliation engine tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconSettings {
    /// Shared retry policy for restoration, signup lookup, and
    /// confirmation polling.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Attempts when polling the profile for subscription confirmation.
    pub confirm_attempts: u32,
}

impl Default for ReconSettings {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            confirm_attempts: 5,
        }
    }
}

/// Top-level settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub recon: ReconSettings,
}

/// `~/.contrail` (or `/tmp/.contrail` without a home directory).
pub fn contrail_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".contrail")
}

/// Resolve the path to the settings file (`~/.contrail/settings.json`).
pub fn settings_path() -> PathBuf {
    contrail_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings, CoreError> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings, CoreError> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
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

/// Apply environment variable overrides to loaded settings.
///
/// Integers must parse and fall within the stated range; invalid values
/// are silently ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Override application with an injectable variable source.
pub fn apply_overrides_from<F>(settings: &mut Settings, get: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = read_string(&get, "CONTRAIL_AUTH_URL") {
        settings.auth.base_url = v;
    }
    if let Some(v) = read_string(&get, "CONTRAIL_DB") {
        settings.store.db_path = v;
    }
    if let Some(v) = read_string(&get, "CONTRAIL_STATE") {
        settings.store.state_path = v;
    }
    if let Some(v) = read_i64(&get, "CONTRAIL_SESSION_TTL_HOURS", 1, 8760) {
        settings.store.session_ttl_hours = v;
    }
    if let Some(v) = read_u32(&get, "CONTRAIL_MAX_ATTEMPTS", 1, 10) {
        settings.recon.retry.max_attempts = v;
    }
    if let Some(v) = read_u32(&get, "CONTRAIL_CONFIRM_ATTEMPTS", 1, 20) {
        settings.recon.confirm_attempts = v;
    }
}

fn read_string<F>(get: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    get(name).filter(|v| !v.is_empty())
}

fn read_u32<F>(get: &F, name: &str, min: u32, max: u32) -> Option<u32>
where
    F: Fn(&str) -> Option<String>,
{
    get(name)?
        .parse::<u32>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

fn read_i64<F>(get: &F, name: &str, min: i64, max: i64) -> Option<i64>
where
    F: Fn(&str) -> Option<String>,
{
    get(name)?
        .parse::<i64>()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert!(settings.auth.base_url.starts_with("https://"));
        assert_eq!(settings.auth.token_expiry_buffer_secs, 300);
        assert_eq!(settings.recon.confirm_attempts, 5);
        assert_eq!(settings.recon.retry.max_attempts, 3);
    }

    #[test]
    fn deep_merge_objects_recursive() {
        let target = serde_json::json!({"a": {"x": 1, "y": 2}, "b": 3});
        let source = serde_json::json!({"a": {"y": 20}});
        let merged = deep_merge(target, source);
        assert_eq!(merged, serde_json::json!({"a": {"x": 1, "y": 20}, "b": 3}));
    }

    #[test]
    fn deep_merge_null_skipped() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged, serde_json::json!({"a": 1}));
    }

    #[test]
    fn deep_merge_arrays_replaced() {
        let target = serde_json::json!({"a": [1, 2, 3]});
        let source = serde_json::json!({"a": [9]});
        let merged = deep_merge(target, source);
        assert_eq!(merged, serde_json::json!({"a": [9]}));
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = load_settings_from_path(&dir.path().join("none.json")).unwrap();
        assert_eq!(settings.recon.confirm_attempts, 5);
    }

    #[test]
    fn load_invalid_json_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    #[test]
    fn load_merges_partial_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"recon": {"confirmAttempts": 9}, "auth": {"baseUrl": "http://localhost:9999"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.recon.confirm_attempts, 9);
        assert_eq!(settings.auth.base_url, "http://localhost:9999");
        // Untouched sections keep their defaults.
        assert_eq!(settings.store.session_ttl_hours, 720);
        assert_eq!(settings.recon.retry.max_attempts, 3);
    }

    fn fake_env<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn override_in_range() {
        let mut settings = Settings::default();
        apply_overrides_from(&mut settings, fake_env(&[("CONTRAIL_CONFIRM_ATTEMPTS", "12")]));
        assert_eq!(settings.recon.confirm_attempts, 12);
    }

    #[test]
    fn override_strings() {
        let mut settings = Settings::default();
        apply_overrides_from(
            &mut settings,
            fake_env(&[
                ("CONTRAIL_AUTH_URL", "http://localhost:9999"),
                ("CONTRAIL_DB", "/tmp/x.db"),
            ]),
        );
        assert_eq!(settings.auth.base_url, "http://localhost:9999");
        assert_eq!(settings.store.db_path, "/tmp/x.db");
    }

    #[test]
    fn override_out_of_range_ignored() {
        let mut settings = Settings::default();
        apply_overrides_from(&mut settings, fake_env(&[("CONTRAIL_MAX_ATTEMPTS", "99")]));
        assert_eq!(settings.recon.retry.max_attempts, 3);
    }

    #[test]
    fn override_garbage_ignored() {
        let mut settings = Settings::default();
        apply_overrides_from(
            &mut settings,
            fake_env(&[("CONTRAIL_SESSION_TTL_HOURS", "soon")]),
        );
        assert_eq!(settings.store.session_ttl_hours, 720);
    }

    #[test]
    fn override_empty_string_ignored() {
        let mut settings = Settings::default();
        apply_overrides_from(&mut settings, fake_env(&[("CONTRAIL_AUTH_URL", "")]));
        assert_eq!(settings.auth.base_url, AuthSettings::default().base_url);
    }
}
