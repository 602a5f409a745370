//! Merge configuration.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment switches:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `TMERGE_BACKUPS_ENABLED` | `backup.enabled` |
//! | `TMERGE_BACKUP_RETENTION_HOURS` | `backup.retention_hours` |
//! | `TMERGE_BACKUP_GRACE_HOURS` | `backup.grace_hours` |
//! | `TMERGE_MAX_BACKUPS` | `backup.max_per_file` |
//! | `TMERGE_LOCK_FILE` | `lock.path` |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default lock file name inside the system temp directory.
pub const DEFAULT_LOCK_NAME: &str = "tmerge.lock";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level merge configuration.
///
/// Missing fields use defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Backup settings.
    #[serde(default)]
    pub backup: BackupConfig,

    /// Lock settings.
    #[serde(default)]
    pub lock: LockConfig,
}

// ---------------------------------------------------------------------------
// BackupConfig
// ---------------------------------------------------------------------------

/// Snapshot and retention settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Take a snapshot before every mutating write (default: `true`).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Backups older than this are pruned (default: 24).
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// Keep a successful merge's backup this long before deleting it
    /// (default: 0, delete immediately).
    #[serde(default)]
    pub grace_hours: u64,

    /// Newest backups kept per file (default: 5).
    #[serde(default = "default_max_per_file")]
    pub max_per_file: usize,

    /// Directory for backups. Defaults to the target's own directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_hours: default_retention_hours(),
            grace_hours: 0,
            max_per_file: default_max_per_file(),
            dir: None,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_retention_hours() -> u64 {
    24
}

const fn default_max_per_file() -> usize {
    5
}

// ---------------------------------------------------------------------------
// LockConfig
// ---------------------------------------------------------------------------

/// Cross-invocation lock settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// Lock record location (default: `<temp dir>/tmerge.lock`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl LockConfig {
    /// The configured lock path, or the host-wide default.
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_LOCK_NAME))
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A configuration file or environment switch was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read tmerge config {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    /// Malformed TOML or an unknown setting.
    #[error("invalid tmerge config{}: {reason}", location(path.as_deref(), *line))]
    Invalid {
        /// File the text came from, when it came from a file.
        path: Option<PathBuf>,
        /// 1-based line of the offending key or value.
        line: Option<usize>,
        reason: String,
    },

    /// An environment switch holds a value of the wrong kind.
    #[error("{var}={value:?} is not {expected}")]
    Switch {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

fn location(path: Option<&Path>, line: Option<usize>) -> String {
    match (path, line) {
        (Some(p), Some(l)) => format!(" {} (line {l})", p.display()),
        (Some(p), None) => format!(" {}", p.display()),
        (None, Some(l)) => format!(" (line {l})"),
        (None, None) => String::new(),
    }
}

impl MergeConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    ///
    /// # Errors
    /// [`ConfigError::Unreadable`] when the file exists but cannot be read,
    /// [`ConfigError::Invalid`] when its contents are rejected.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Unreadable {
                    path: path.to_owned(),
                    reason: e.to_string(),
                });
            }
        };
        Self::parse(&text).map_err(|err| match err {
            ConfigError::Invalid { line, reason, .. } => ConfigError::Invalid {
                path: Some(path.to_owned()),
                line,
                reason,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] on malformed TOML or unknown fields.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Invalid {
            path: None,
            line: e
                .span()
                .map(|span| text[..span.start].matches('\n').count() + 1),
            reason: e.message().to_owned(),
        })
    }

    /// Load the optional file, then apply process environment overrides.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file or any switch is invalid.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Apply environment-style overrides from `lookup`.
    ///
    /// # Errors
    /// [`ConfigError::Switch`] naming the variable when a value does not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TMERGE_BACKUPS_ENABLED") {
            self.backup.enabled = parse_bool("TMERGE_BACKUPS_ENABLED", &v)?;
        }
        if let Some(v) = lookup("TMERGE_BACKUP_RETENTION_HOURS") {
            self.backup.retention_hours = parse_num("TMERGE_BACKUP_RETENTION_HOURS", &v)?;
        }
        if let Some(v) = lookup("TMERGE_BACKUP_GRACE_HOURS") {
            self.backup.grace_hours = parse_num("TMERGE_BACKUP_GRACE_HOURS", &v)?;
        }
        if let Some(v) = lookup("TMERGE_MAX_BACKUPS") {
            self.backup.max_per_file = parse_num("TMERGE_MAX_BACKUPS", &v)?;
        }
        if let Some(v) = lookup("TMERGE_LOCK_FILE")
            && !v.trim().is_empty()
        {
            self.lock.path = Some(PathBuf::from(v));
        }
        Ok(())
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Switch {
            var,
            value: value.to_owned(),
            expected: "a boolean (true/false/1/0)",
        }),
    }
}

fn parse_num<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Switch {
        var,
        value: value.to_owned(),
        expected: "a non-negative integer",
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
