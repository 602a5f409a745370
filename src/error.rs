//! Error types for merge operations.
//!
//! [`MergeError`] is the single error type returned by the merge pipeline.
//! Every variant names the offending file or PID so the message alone tells
//! the caller what to fix. Failures that happen after a backup was taken
//! carry a [`RestoreStatus`] describing whether the target was rolled back.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ConfigError;
use crate::integrity::IntegrityViolation;
use crate::merge_state::InvalidTransition;

/// Errors returned by the merge pipeline and its components.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Source or target has a duplicated or damaged marker.
    #[error("integrity check failed for {}: {violation}", path.display())]
    Integrity {
        /// The file that failed the check.
        path: PathBuf,
        /// What was wrong with it.
        violation: IntegrityViolation,
    },

    /// Source and target resolve to the same file.
    #[error(
        "refusing to merge {} into itself\n  To fix: pass a different target path",
        path.display()
    )]
    SelfMerge {
        /// The canonical path both arguments resolved to.
        path: PathBuf,
    },

    /// Another live process holds the merge lock.
    #[error(
        "another merge is running (pid {pid}, lock {})\n  To fix: wait for it to finish; \
         the lock is released automatically when that process exits",
        lock_path.display()
    )]
    LockBusy {
        /// PID recorded in the lock file.
        pid: u32,
        /// Location of the lock record.
        lock_path: PathBuf,
    },

    /// The staged document failed validation before commit.
    #[error("assembled document for {} is invalid: {reason} ({restore})", path.display())]
    Assembly {
        /// The target being merged into.
        path: PathBuf,
        /// What the validation found.
        reason: String,
        /// Outcome of the rollback attempt.
        restore: RestoreStatus,
    },

    /// A filesystem operation failed.
    #[error("{op} {}: {source}{}", path.display(), restore.suffix())]
    Io {
        /// Short verb for the failed operation (e.g. `"rename"`).
        op: &'static str,
        /// Path the operation was acting on.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
        /// Outcome of the rollback attempt.
        restore: RestoreStatus,
    },

    /// The merge source does not exist.
    #[error("source {} does not exist", path.display())]
    SourceMissing {
        /// The path that was given as source.
        path: PathBuf,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The engine attempted an illegal phase transition.
    #[error("internal error: {0}")]
    Internal(#[from] InvalidTransition),
}

impl MergeError {
    /// I/O failure with no rollback involved.
    pub fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_owned(),
            source,
            restore: RestoreStatus::NotAttempted,
        }
    }

    /// Attach the outcome of a rollback attempt.
    #[must_use]
    pub fn with_restore(mut self, status: RestoreStatus) -> Self {
        match &mut self {
            Self::Assembly { restore, .. } | Self::Io { restore, .. } => *restore = status,
            _ => {}
        }
        self
    }

    /// Process exit status for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Io { .. } => 1,
            Self::Config(_) => 2,
            Self::Integrity { .. } => 3,
            Self::SelfMerge { .. } => 4,
            Self::LockBusy { .. } => 5,
            Self::Assembly { .. } => 6,
            Self::SourceMissing { .. } => 7,
            Self::Internal(_) => 70,
        }
    }
}

/// Result of trying to roll a target back from its backup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RestoreStatus {
    /// No backup existed, so nothing was restored.
    #[default]
    NotAttempted,
    /// The target was restored from `backup`.
    Restored {
        /// Backup the target was restored from.
        backup: PathBuf,
    },
    /// Restoring from `backup` failed as well.
    Failed {
        /// Backup that could not be restored.
        backup: PathBuf,
        /// Why the restore failed.
        reason: String,
    },
}

impl RestoreStatus {
    fn suffix(&self) -> String {
        match self {
            Self::NotAttempted => String::new(),
            other => format!(" ({other})"),
        }
    }
}

impl fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAttempted => write!(f, "target not modified"),
            Self::Restored { backup } => {
                write!(f, "target restored from {}", backup.display())
            }
            Self::Failed { backup, reason } => write!(
                f,
                "RESTORE FAILED from {}: {reason}; recover manually from that backup",
                backup.display()
            ),
        }
    }
}
