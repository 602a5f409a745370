//! The merge engine.
//!
//! Drives one merge of a source template into a target document through the
//! phases in [`crate::merge_state`]:
//!
//! 1. **Validate**: reject self-merge, then run the marker integrity check on
//!    both files. Nothing on disk changes before this passes.
//! 2. **Normalize**: strip any earlier merge output from the source. A
//!    missing target is created as a plain copy of the normalized source.
//! 3. **Compare**: equal, non-empty fingerprints mean the merge is a no-op.
//! 4. **Back up**, **assemble** into a temp file, **validate and commit** by
//!    rename. Any failure after the backup restores the target from it.
//! 5. **Clean up**: discard the backup (or keep it for the grace period) and
//!    prune old backups. Cleanup failures are logged, never fatal.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::atomic::{self, Expect, StagedFile};
use crate::backup::BackupManager;
use crate::config::MergeConfig;
use crate::document::{self, Document};
use crate::error::{MergeError, RestoreStatus};
use crate::fingerprint::{self, Fingerprint};
use crate::integrity;
use crate::lock::LockManager;
use crate::merge_state::{MergePhase, MergeState};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Per-invocation switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Stop after the comparison and report what would happen.
    pub dry_run: bool,
}

/// What a merge did to the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Target did not exist and was created from the source.
    Created,
    /// Template region already matched; nothing was written.
    Unchanged,
    /// Template region was replaced.
    Updated,
    /// Dry run: the target would be created.
    WouldCreate,
    /// Dry run: the template region would be replaced.
    WouldUpdate,
}

impl MergeOutcome {
    /// Whether the target file was written.
    #[must_use]
    pub const fn wrote(self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

/// Summary of one merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Source path as given.
    pub source: PathBuf,
    /// Target path as given.
    pub target: PathBuf,
    /// What happened.
    pub outcome: MergeOutcome,
    /// Phases visited, in order.
    pub phases: Vec<MergePhase>,
    /// Fingerprint of the normalized source.
    pub source_fingerprint: Option<Fingerprint>,
    /// Fingerprint of the target's template region before the merge.
    pub target_fingerprint: Option<Fingerprint>,
    /// Backup left on disk (grace period), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    /// Number of old backups pruned.
    pub pruned: usize,
}

// ---------------------------------------------------------------------------
// Merger
// ---------------------------------------------------------------------------

/// Merges template sources into target documents.
#[derive(Clone, Debug)]
pub struct Merger {
    config: MergeConfig,
    backups: BackupManager,
    options: MergeOptions,
}

impl Merger {
    /// Create a merger for the given configuration.
    #[must_use]
    pub fn new(config: MergeConfig) -> Self {
        let backups = BackupManager::new(config.backup.clone());
        Self {
            config,
            backups,
            options: MergeOptions::default(),
        }
    }

    /// Replace the per-invocation options.
    #[must_use]
    pub const fn with_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// The backup manager used by this merger.
    #[must_use]
    pub const fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Lock manager for the configured lock path.
    #[must_use]
    pub fn lock_manager(&self) -> LockManager {
        LockManager::new(self.config.lock.resolved_path())
    }

    /// Merge `source` into `target` under the host-wide lock.
    ///
    /// # Errors
    /// [`MergeError::LockBusy`] if another merge is running, otherwise any
    /// error from [`Merger::merge_at`].
    pub fn merge(&self, source: &Path, target: &Path) -> Result<MergeReport, MergeError> {
        let lock = self.lock_manager().acquire()?;
        let result = self.merge_at(source, target, Utc::now());
        lock.release();
        result
    }

    /// Merge `source` into `target` using `now` for the timestamp line and
    /// backup names. Does not take the lock.
    ///
    /// # Errors
    /// See [`MergeError`]. Errors raised after a backup was taken carry the
    /// result of the automatic restore.
    #[instrument(skip_all, fields(source = %source.display(), target = %target.display()))]
    pub fn merge_at(
        &self,
        source: &Path,
        target: &Path,
        now: DateTime<Utc>,
    ) -> Result<MergeReport, MergeError> {
        let mut state = MergeState::new();
        let result = self.run(&mut state, source, target, now);
        if let Err(e) = &result {
            state.abort();
            error!(phases = ?state.history(), error = %e, "merge aborted");
        }
        result
    }

    fn run(
        &self,
        state: &mut MergeState,
        source: &Path,
        target: &Path,
        now: DateTime<Utc>,
    ) -> Result<MergeReport, MergeError> {
        // Validate
        let source_text = read_source(source)?;
        let target_text = read_optional(target)?;
        reject_self_merge(source, target, target_text.is_some())?;
        integrity::check_text(source, &source_text)?;
        if let Some(text) = &target_text {
            integrity::check_text(target, text)?;
        }
        state.advance(MergePhase::Validated)?;

        // Normalize
        let pristine = document::normalize(&source_text);
        let source_fingerprint = fingerprint::fingerprint_body(&pristine);
        state.advance(MergePhase::Normalized)?;

        let mut report = MergeReport {
            source: source.to_owned(),
            target: target.to_owned(),
            outcome: MergeOutcome::Unchanged,
            phases: Vec::new(),
            source_fingerprint,
            target_fingerprint: None,
            backup: None,
            pruned: 0,
        };

        let Some(target_text) = target_text else {
            if self.options.dry_run {
                return Ok(finish(report, state, MergeOutcome::WouldCreate));
            }
            create_target(target, &pristine)?;
            state.advance(MergePhase::Committed)?;
            state.advance(MergePhase::Cleaned)?;
            info!("target created from source");
            return Ok(finish(report, state, MergeOutcome::Created));
        };

        // Compare
        let existing = Document::parse(&target_text);
        report.target_fingerprint = existing.fingerprint();
        state.advance(MergePhase::Compared)?;

        if report.source_fingerprint.is_some()
            && report.source_fingerprint == report.target_fingerprint
        {
            state.advance(MergePhase::NoOpDone)?;
            info!("template unchanged; nothing to do");
            return Ok(finish(report, state, MergeOutcome::Unchanged));
        }
        if self.options.dry_run {
            return Ok(finish(report, state, MergeOutcome::WouldUpdate));
        }

        // Back up
        let now_secs = u64::try_from(now.timestamp()).unwrap_or_default();
        let backup = self.backups.snapshot(target, now_secs)?;
        state.advance(MergePhase::BackedUp)?;

        // Assemble + commit
        let merged = Document::assemble(&existing.custom, &pristine, now).render();
        self.commit_merged(state, target, &merged, backup.as_deref())?;
        info!(backup = ?backup, "template region updated");

        // Clean up
        report.backup = backup.filter(|b| self.backups.discard(b));
        report.pruned = self
            .backups
            .prune(&self.backups.dir_for(target), now_secs)
            .removed();
        state.advance(MergePhase::Cleaned)?;

        Ok(finish(report, state, MergeOutcome::Updated))
    }

    /// Stage, validate and commit `merged`, restoring from `backup` on failure.
    fn commit_merged(
        &self,
        state: &mut MergeState,
        target: &Path,
        merged: &str,
        backup: Option<&Path>,
    ) -> Result<(), MergeError> {
        stage_and_commit(state, target, merged).map_err(|err| self.roll_back(err, target, backup))
    }

    fn roll_back(&self, err: MergeError, target: &Path, backup: Option<&Path>) -> MergeError {
        let Some(backup) = backup else {
            return err;
        };
        let status = match self.backups.restore(backup, target) {
            Ok(()) => RestoreStatus::Restored {
                backup: backup.to_owned(),
            },
            Err(restore_err) => {
                error!(backup = %backup.display(), error = %restore_err, "restore after failed merge also failed");
                RestoreStatus::Failed {
                    backup: backup.to_owned(),
                    reason: restore_err.to_string(),
                }
            }
        };
        err.with_restore(status)
    }

    /// Restore `target` from `from`, or from its newest backup, under the lock.
    ///
    /// The backup must itself pass the marker integrity check.
    ///
    /// # Errors
    /// [`MergeError::LockBusy`], [`MergeError::Integrity`] for a damaged
    /// backup, or [`MergeError::Io`] when no backup exists or the write fails.
    pub fn restore(&self, target: &Path, from: Option<&Path>) -> Result<PathBuf, MergeError> {
        let lock = self.lock_manager().acquire()?;
        let backup = match from {
            Some(path) => path.to_owned(),
            None => self
                .backups
                .latest(target)?
                .map(|entry| entry.path)
                .ok_or_else(|| {
                    MergeError::io(
                        "restore",
                        target,
                        std::io::Error::new(std::io::ErrorKind::NotFound, "no backup found"),
                    )
                })?,
        };
        if integrity::check_file(&backup)?.is_none() {
            return Err(MergeError::io(
                "restore from",
                &backup,
                std::io::Error::new(std::io::ErrorKind::NotFound, "backup does not exist"),
            ));
        }
        self.backups.restore(&backup, target)?;
        lock.release();
        Ok(backup)
    }
}

/// First merge into a missing target: a plain copy of the normalized source.
fn create_target(target: &Path, pristine: &str) -> Result<(), MergeError> {
    let dir = atomic::parent_dir(target);
    fs::create_dir_all(&dir).map_err(|e| MergeError::io("create directory", &dir, e))?;
    atomic::write_atomic(target, pristine.as_bytes(), Expect::Any)
        .map_err(|e| e.into_merge_error(target))
}

fn stage_and_commit(state: &mut MergeState, target: &Path, merged: &str) -> Result<(), MergeError> {
    let staged = StagedFile::create_in(&atomic::parent_dir(target), merged.as_bytes())?;
    state.advance(MergePhase::Assembled)?;
    staged
        .validate(Expect::ManagedDocument)
        .map_err(|e| e.into_merge_error(target))?;
    staged.commit(target)?;
    state.advance(MergePhase::Committed)?;
    Ok(())
}

fn finish(mut report: MergeReport, state: &MergeState, outcome: MergeOutcome) -> MergeReport {
    report.outcome = outcome;
    report.phases = state.history().to_vec();
    report
}

fn read_source(source: &Path) -> Result<String, MergeError> {
    fs::read_to_string(source).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MergeError::SourceMissing {
                path: source.to_owned(),
            }
        } else {
            MergeError::io("read", source, e)
        }
    })
}

fn read_optional(path: &Path) -> Result<Option<String>, MergeError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MergeError::io("read", path, e)),
    }
}

fn reject_self_merge(source: &Path, target: &Path, target_exists: bool) -> Result<(), MergeError> {
    if !target_exists {
        return Ok(());
    }
    let canonical_source =
        fs::canonicalize(source).map_err(|e| MergeError::io("resolve", source, e))?;
    let canonical_target =
        fs::canonicalize(target).map_err(|e| MergeError::io("resolve", target, e))?;
    if canonical_source == canonical_target {
        return Err(MergeError::SelfMerge {
            path: canonical_source,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
