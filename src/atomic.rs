//! Atomic file replacement.
//!
//! Content is written to a temporary file in the destination directory
//! (same filesystem), fsynced, re-read and validated, and only then renamed
//! over the destination. An uncommitted [`StagedFile`] removes its temp file
//! on drop, so an aborted merge leaves nothing behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::document::MARKER;
use crate::error::MergeError;

/// What a staged file must look like before it may be committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expect {
    /// A merged document: non-empty with exactly one marker line.
    ManagedDocument,
    /// Any content (plain copies and restores).
    Any,
}

/// A fully written, not yet committed temporary file.
#[derive(Debug)]
pub struct StagedFile {
    tmp: NamedTempFile,
}

impl StagedFile {
    /// Write `contents` to a fresh temp file inside `dir` and fsync it.
    ///
    /// # Errors
    /// [`MergeError::Io`] if the temp file cannot be created or written.
    pub fn create_in(dir: &Path, contents: &[u8]) -> Result<Self, MergeError> {
        crate::fp!("FP_STAGE_WRITE").map_err(|e| MergeError::io("stage", dir, e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".tmerge-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| MergeError::io("create temp file in", dir, e))?;
        tmp.write_all(contents)
            .map_err(|e| MergeError::io("write", tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| MergeError::io("fsync", tmp.path(), e))?;
        Ok(Self { tmp })
    }

    /// Path of the temp file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.tmp.path()
    }

    /// Re-read the staged bytes from disk and check them against `expect`.
    ///
    /// # Errors
    /// [`WriteError::Rejected`] when the content fails validation,
    /// [`WriteError::Io`] if the staged file cannot be read back.
    pub fn validate(&self, expect: Expect) -> Result<(), WriteError> {
        if expect == Expect::Any {
            return Ok(());
        }
        let written = fs::read(self.path())
            .map_err(|e| WriteError::Io(MergeError::io("read back", self.path(), e)))?;
        if written.is_empty() {
            return Err(WriteError::Rejected("staged file is empty".to_owned()));
        }
        let text = String::from_utf8_lossy(&written);
        let markers = text.lines().filter(|l| *l == MARKER).count();
        if markers != 1 {
            return Err(WriteError::Rejected(format!(
                "staged file has {markers} marker lines, expected exactly 1"
            )));
        }
        Ok(())
    }

    /// Rename the staged file over `dest`.
    ///
    /// When `dest` already exists its permissions are carried over first.
    ///
    /// # Errors
    /// [`MergeError::Io`] if the rename fails; the temp file is removed.
    pub fn commit(self, dest: &Path) -> Result<(), MergeError> {
        if let Ok(meta) = fs::metadata(dest) {
            fs::set_permissions(self.path(), meta.permissions())
                .map_err(|e| MergeError::io("copy permissions to", self.path(), e))?;
        }
        crate::fp!("FP_BEFORE_COMMIT").map_err(|e| MergeError::io("rename onto", dest, e))?;
        self.tmp
            .persist(dest)
            .map_err(|e| MergeError::io("rename onto", dest, e.error))?;
        Ok(())
    }
}

/// Stage, validate and commit `contents` onto `dest` in one step.
///
/// # Errors
/// [`WriteError::Rejected`] if validation fails (`dest` untouched),
/// [`WriteError::Io`] on filesystem failure.
pub fn write_atomic(dest: &Path, contents: &[u8], expect: Expect) -> Result<(), WriteError> {
    let dir = parent_dir(dest);
    let staged = StagedFile::create_in(&dir, contents)?;
    staged.validate(expect)?;
    Ok(staged.commit(dest)?)
}

/// Failure from [`write_atomic`].
#[derive(Debug)]
pub enum WriteError {
    /// The staged content failed validation; `dest` was not touched.
    Rejected(String),
    /// A filesystem operation failed.
    Io(MergeError),
}

impl From<MergeError> for WriteError {
    fn from(e: MergeError) -> Self {
        Self::Io(e)
    }
}

impl WriteError {
    /// Convert into a [`MergeError`], mapping rejection to
    /// [`MergeError::Assembly`] for `target`.
    #[must_use]
    pub fn into_merge_error(self, target: &Path) -> MergeError {
        match self {
            Self::Rejected(reason) => MergeError::Assembly {
                path: target.to_owned(),
                reason,
                restore: crate::error::RestoreStatus::NotAttempted,
            },
            Self::Io(e) => e,
        }
    }
}

/// Directory that holds `path`, treating a bare file name as `.`.
#[must_use]
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_owned(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn managed(body: &str) -> String {
        format!("{MARKER}\n# Auto-updated: x\n\n{body}")
    }

    #[test]
    fn write_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.md");
        write_atomic(&dest, managed("a\n").as_bytes(), Expect::ManagedDocument).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), managed("a\n"));
    }

    #[test]
    fn overwrite_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.md");
        fs::write(&dest, "old content that is longer than the new one\n").unwrap();
        write_atomic(&dest, b"new\n", Expect::Any).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new\n");
    }

    #[test]
    fn rejected_content_leaves_dest_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.md");
        fs::write(&dest, "original\n").unwrap();

        let doubled = format!("{MARKER}\n{MARKER}\n");
        let err = write_atomic(&dest, doubled.as_bytes(), Expect::ManagedDocument).unwrap_err();
        assert!(matches!(err, WriteError::Rejected(ref r) if r.contains("2 marker")));

        let err = write_atomic(&dest, b"", Expect::ManagedDocument).unwrap_err();
        assert!(matches!(err, WriteError::Rejected(ref r) if r.contains("empty")));

        assert_eq!(fs::read_to_string(&dest).unwrap(), "original\n");
    }

    #[test]
    fn tmp_file_cleaned_up_after_write_and_after_reject() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.md");
        write_atomic(&dest, b"x\n", Expect::Any).unwrap();
        let _ = write_atomic(&dest, b"", Expect::ManagedDocument);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[cfg(unix)]
    #[test]
    fn commit_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.md");
        fs::write(&dest, "old\n").unwrap();
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o640)).unwrap();

        write_atomic(&dest, b"new\n", Expect::Any).unwrap();
        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn parent_dir_of_bare_name_is_cwd() {
        assert_eq!(parent_dir(Path::new("file.md")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("/a/b.md")), PathBuf::from("/a"));
    }
}
