//! Configuration management.
//!
//! Connection and session settings for a [`DbContext`](crate::DbContext).
//! Values come from an optional JSON file, overlaid by environment
//! variables; anything unset keeps its default.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the database file.
pub const DB_ENV: &str = "ENTITYLITE_DB";
/// Environment variable overriding the busy timeout in milliseconds.
pub const BUSY_TIMEOUT_ENV: &str = "ENTITYLITE_BUSY_TIMEOUT_MS";
/// Environment variable toggling the per-session detail cache.
pub const DETAIL_CACHE_ENV: &str = "ENTITYLITE_DETAIL_CACHE";

/// Settings used to open connections and sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    /// Database file; `None` falls back to [`resolve_db_path`].
    pub database_path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    pub detail_cache_enabled: bool,
    pub enforce_foreign_keys: bool,
    /// Open file databases in WAL journal mode.
    pub wal: bool,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: 5000,
            detail_cache_enabled: true,
            enforce_foreign_keys: true,
            wal: true,
        }
    }
}

impl OrmConfig {
    /// Read a JSON config file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read and `Config` if it is not a
    /// valid configuration document.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Defaults overlaid with the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a variable holds an unparseable value.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Apply `ENTITYLITE_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a variable holds an unparseable value.
    pub fn overlay_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(DB_ENV) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = get(BUSY_TIMEOUT_ENV) {
            self.busy_timeout_ms = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{BUSY_TIMEOUT_ENV}: not a number: {raw}")))?;
        }
        if let Some(raw) = get(DETAIL_CACHE_ENV) {
            self.detail_cache_enabled = parse_flag(&raw)
                .ok_or_else(|| Error::Config(format!("{DETAIL_CACHE_ENV}: not a flag: {raw}")))?;
        }
        Ok(self)
    }

    /// The database file this config points at.
    #[must_use]
    pub fn database_path(&self) -> Option<PathBuf> {
        resolve_db_path(self.database_path.as_deref())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Default data directory: `~/.entitylite/`.
#[must_use]
pub fn global_data_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".entitylite"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. `explicit_path`, if provided
/// 2. `ENTITYLITE_DB` environment variable
/// 3. `~/.entitylite/data.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var(DB_ENV) {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_data_dir().map(|dir| dir.join("data.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = OrmConfig::default();
        assert_eq!(config.busy_timeout_ms, 5000);
        assert!(config.detail_cache_enabled);
        assert!(config.enforce_foreign_keys);
        assert!(config.wal);
    }

    #[test]
    fn test_overlay_env() {
        let config = OrmConfig::default()
            .overlay_env(env(&[
                (DB_ENV, "/tmp/x.db"),
                (BUSY_TIMEOUT_ENV, "250"),
                (DETAIL_CACHE_ENV, "false"),
            ]))
            .unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(config.busy_timeout_ms, 250);
        assert!(!config.detail_cache_enabled);

        let blank = OrmConfig::default().overlay_env(env(&[(DB_ENV, "  ")])).unwrap();
        assert_eq!(blank.database_path, None);
    }

    #[test]
    fn test_overlay_env_rejects_garbage() {
        let err = OrmConfig::default()
            .overlay_env(env(&[(BUSY_TIMEOUT_ENV, "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err = OrmConfig::default()
            .overlay_env(env(&[(DETAIL_CACHE_ENV, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entitylite.json");
        std::fs::write(&path, r#"{"busy_timeout_ms": 100, "wal": false}"#).unwrap();
        let config = OrmConfig::load(&path).unwrap();
        assert_eq!(config.busy_timeout_ms, 100);
        assert!(!config.wal);
        assert!(config.detail_cache_enabled);

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(OrmConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/db.sqlite");
        assert_eq!(resolve_db_path(Some(&explicit)), Some(explicit));
    }

    #[test]
    fn test_resolve_db_path_default_file_name() {
        if std::env::var(DB_ENV).is_ok() {
            return;
        }
        let path = resolve_db_path(None).unwrap();
        assert!(path.ends_with("data.db"));
    }
}
