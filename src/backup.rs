//! Timestamped backups of merge targets.
//!
//! Before every mutating write the target is copied to
//! `<name>.backup.<unix secs>` (with a `-<n>` suffix when two snapshots land
//! in the same second). Backups are indexed by parsing those names into a
//! [`BackupIndex`] rather than by matching suffixes ad hoc, and pruned by age
//! and by a newest-N-per-file policy.
//!
//! Pruning is best effort: individual failures are collected in the
//! [`PruneReport`] and logged, never returned as errors.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::atomic::{self, Expect, WriteError};
use crate::config::BackupConfig;
use crate::error::MergeError;

/// Infix between the original file name and the timestamp.
pub const BACKUP_INFIX: &str = ".backup.";

const SECS_PER_HOUR: u64 = 3600;

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// One backup file on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    /// Full path of the backup file.
    pub path: PathBuf,
    /// Unix seconds at which the snapshot was taken.
    pub created: u64,
    /// Disambiguator for snapshots taken in the same second.
    pub seq: u32,
}

impl BackupEntry {
    /// Parse a backup file name into `(original name, created, seq)`.
    #[must_use]
    pub fn parse_name(file_name: &str) -> Option<(&str, u64, u32)> {
        let (original, suffix) = file_name.rsplit_once(BACKUP_INFIX)?;
        if original.is_empty() {
            return None;
        }
        let (secs, seq) = match suffix.split_once('-') {
            Some((secs, seq)) => (secs, seq.parse().ok()?),
            None => (suffix, 0),
        };
        if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((original, secs.parse().ok()?, seq))
    }
}

/// Backups in a directory, grouped by the file they were taken from.
///
/// Each group is sorted oldest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackupIndex {
    groups: BTreeMap<String, Vec<BackupEntry>>,
}

impl BackupIndex {
    /// Scan `dir` for backup files. A missing directory yields an empty index.
    ///
    /// # Errors
    /// Returns the I/O error if the directory exists but cannot be read.
    pub fn scan(dir: &Path) -> std::io::Result<Self> {
        let mut index = Self::default();
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(e),
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if let Some((original, created, seq)) = BackupEntry::parse_name(&name) {
                index
                    .groups
                    .entry(original.to_owned())
                    .or_default()
                    .push(BackupEntry { path, created, seq });
            }
        }
        for group in index.groups.values_mut() {
            group.sort_by_key(|e| (e.created, e.seq));
        }
        Ok(index)
    }

    /// Backups of `original`, oldest first.
    #[must_use]
    pub fn entries(&self, original: &str) -> &[BackupEntry] {
        self.groups.get(original).map_or(&[], Vec::as_slice)
    }

    /// Iterate over `(original name, backups)` groups.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[BackupEntry])> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Total number of backups across all groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// `true` when no backups were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Outcome of a prune pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Backups deleted because they exceeded the age limit.
    pub expired: Vec<PathBuf>,
    /// Backups deleted because their file had more than the allowed count.
    pub over_limit: Vec<PathBuf>,
    /// Backups that could not be deleted, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl PruneReport {
    /// Number of backups removed.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.expired.len() + self.over_limit.len()
    }
}

/// Creates, restores and prunes backups according to [`BackupConfig`].
#[derive(Clone, Debug)]
pub struct BackupManager {
    config: BackupConfig,
}

impl BackupManager {
    /// Create a manager for the given settings.
    #[must_use]
    pub const fn new(config: BackupConfig) -> Self {
        Self { config }
    }

    /// Whether snapshots are taken at all.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Directory holding the backups of `target`.
    #[must_use]
    pub fn dir_for(&self, target: &Path) -> PathBuf {
        self.config
            .dir
            .clone()
            .unwrap_or_else(|| atomic::parent_dir(target))
    }

    /// Copy `target` to a fresh timestamped backup.
    ///
    /// Returns `None` when backups are disabled.
    ///
    /// # Errors
    /// [`MergeError::Io`] if the copy fails.
    pub fn snapshot(&self, target: &Path, now_secs: u64) -> Result<Option<PathBuf>, MergeError> {
        if !self.config.enabled {
            return Ok(None);
        }
        crate::fp!("FP_SNAPSHOT").map_err(|e| MergeError::io("snapshot", target, e))?;

        let dir = self.dir_for(target);
        fs::create_dir_all(&dir).map_err(|e| MergeError::io("create backup dir", &dir, e))?;

        let name = file_name(target)?;
        let mut seq = 0_u32;
        let backup = loop {
            let candidate = if seq == 0 {
                dir.join(format!("{name}{BACKUP_INFIX}{now_secs}"))
            } else {
                dir.join(format!("{name}{BACKUP_INFIX}{now_secs}-{seq}"))
            };
            if !candidate.exists() {
                break candidate;
            }
            seq += 1;
        };

        fs::copy(target, &backup).map_err(|e| MergeError::io("snapshot", target, e))?;
        debug!(backup = %backup.display(), "snapshot taken");
        Ok(Some(backup))
    }

    /// Overwrite `target` with the contents of `backup`, atomically.
    ///
    /// # Errors
    /// [`MergeError::Io`] if the backup cannot be read or the write fails.
    pub fn restore(&self, backup: &Path, target: &Path) -> Result<(), MergeError> {
        let bytes = fs::read(backup).map_err(|e| MergeError::io("read backup", backup, e))?;
        atomic::write_atomic(target, &bytes, Expect::Any).map_err(|e| match e {
            WriteError::Io(err) => err,
            WriteError::Rejected(reason) => MergeError::io(
                "restore",
                target,
                std::io::Error::other(reason),
            ),
        })?;
        warn!(backup = %backup.display(), target = %target.display(), "target restored from backup");
        Ok(())
    }

    /// Delete a backup after a successful merge, unless a grace period is
    /// configured. Returns `true` if the backup was kept.
    pub fn discard(&self, backup: &Path) -> bool {
        if self.config.grace_hours > 0 {
            debug!(backup = %backup.display(), grace_hours = self.config.grace_hours, "keeping backup for grace period");
            return true;
        }
        if let Err(e) = fs::remove_file(backup) {
            warn!(backup = %backup.display(), error = %e, "could not delete backup after merge");
            return true;
        }
        false
    }

    /// Backups of `target`, oldest first.
    ///
    /// # Errors
    /// [`MergeError::Io`] if the backup directory cannot be read.
    pub fn list(&self, target: &Path) -> Result<Vec<BackupEntry>, MergeError> {
        let dir = self.dir_for(target);
        let index = BackupIndex::scan(&dir).map_err(|e| MergeError::io("scan", &dir, e))?;
        Ok(index.entries(&file_name(target)?).to_vec())
    }

    /// Newest backup of `target`, if any.
    ///
    /// # Errors
    /// [`MergeError::Io`] if the backup directory cannot be read.
    pub fn latest(&self, target: &Path) -> Result<Option<BackupEntry>, MergeError> {
        Ok(self.list(target)?.pop())
    }

    /// Age threshold in seconds. A backup kept for its grace period is never
    /// pruned before the grace expires.
    const fn max_age_secs(&self) -> u64 {
        let hours = if self.config.grace_hours > self.config.retention_hours {
            self.config.grace_hours
        } else {
            self.config.retention_hours
        };
        hours.saturating_mul(SECS_PER_HOUR)
    }

    /// Prune every backup group in `dir`: first by age, then keep the newest
    /// `max_per_file` of each file.
    pub fn prune(&self, dir: &Path, now_secs: u64) -> PruneReport {
        let mut report = PruneReport::default();
        let index = match BackupIndex::scan(dir) {
            Ok(i) => i,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "could not scan backups for pruning");
                report.failed.push((dir.to_owned(), e.to_string()));
                return report;
            }
        };

        let max_age = self.max_age_secs();
        for (original, entries) in index.groups() {
            let mut survivors = Vec::with_capacity(entries.len());
            for entry in entries {
                if now_secs.saturating_sub(entry.created) > max_age {
                    remove(entry, &mut report.expired, &mut report.failed);
                } else {
                    survivors.push(entry);
                }
            }

            let excess = survivors.len().saturating_sub(self.config.max_per_file);
            for entry in &survivors[..excess] {
                remove(entry, &mut report.over_limit, &mut report.failed);
            }
            debug!(file = original, kept = survivors.len() - excess, "pruned backups");
        }

        for (path, reason) in &report.failed {
            warn!(backup = %path.display(), error = %reason, "backup prune failed");
        }
        report
    }
}

fn remove(entry: &BackupEntry, removed: &mut Vec<PathBuf>, failed: &mut Vec<(PathBuf, String)>) {
    match fs::remove_file(&entry.path) {
        Ok(()) => removed.push(entry.path.clone()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => failed.push((entry.path.clone(), e.to_string())),
    }
}

fn file_name(path: &Path) -> Result<String, MergeError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            MergeError::io(
                "derive backup name for",
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no UTF-8 file name"),
            )
        })
}
