//! Marker integrity checks.
//!
//! A document is valid when the exact marker appears at most once and every
//! line carrying the marker's distinguishing fragment is an exact marker
//! line. Anything else (duplicated marker, truncated or garbled marker) is
//! refused rather than repaired.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::document::{MARKER, MARKER_PREFIX};
use crate::error::MergeError;

/// Marker occurrence counts for a valid document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MarkerCount {
    /// Lines equal to the marker.
    pub exact: usize,
    /// Lines containing the marker fragment (exact lines included).
    pub partial: usize,
}

/// Why a document failed the integrity check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrityViolation {
    /// The exact marker appears more than once.
    DuplicateMarker {
        /// Number of exact marker lines.
        count: usize,
        /// 1-based line number of the second marker.
        line: usize,
    },
    /// A line contains the marker fragment but is not the exact marker.
    CorruptedMarker {
        /// 1-based line number of the first corrupted line.
        line: usize,
        /// The offending line, as found.
        content: String,
    },
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateMarker { count, line } => write!(
                f,
                "marker appears {count} times (second occurrence on line {line}); \
                 a document may contain it at most once"
            ),
            Self::CorruptedMarker { line, content } => write!(
                f,
                "line {line} looks like a damaged marker: {content:?}\n  \
                 To fix: restore the line to exactly {MARKER:?} or remove it"
            ),
        }
    }
}

/// Count marker lines and validate the counts.
///
/// # Errors
/// Returns the first [`IntegrityViolation`] found.
pub fn check(text: &str) -> Result<MarkerCount, IntegrityViolation> {
    let mut count = MarkerCount::default();
    let mut second_exact = None;
    let mut first_corrupt = None;

    for (idx, line) in text.lines().enumerate() {
        if !line.contains(MARKER_PREFIX) {
            continue;
        }
        count.partial += 1;
        if line == MARKER {
            count.exact += 1;
            if count.exact == 2 {
                second_exact = Some(idx + 1);
            }
        } else if first_corrupt.is_none() {
            first_corrupt = Some((idx + 1, line.to_owned()));
        }
    }

    if count.partial > count.exact
        && let Some((line, content)) = first_corrupt
    {
        return Err(IntegrityViolation::CorruptedMarker { line, content });
    }
    if count.exact > 1 {
        return Err(IntegrityViolation::DuplicateMarker {
            count: count.exact,
            line: second_exact.unwrap_or_default(),
        });
    }
    Ok(count)
}

/// Check a file on disk. A missing file is trivially valid.
///
/// # Errors
/// [`MergeError::Integrity`] naming the file, or [`MergeError::Io`] when the
/// file exists but cannot be read.
pub fn check_file(path: &Path) -> Result<Option<MarkerCount>, MergeError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MergeError::io("read", path, e)),
    };
    check_text(path, &text).map(Some)
}

/// Check already-loaded text, attributing failures to `path`.
///
/// # Errors
/// [`MergeError::Integrity`] naming `path`.
pub fn check_text(path: &Path, text: &str) -> Result<MarkerCount, MergeError> {
    check(text).map_err(|violation| MergeError::Integrity {
        path: path.to_owned(),
        violation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_marker_is_valid() {
        assert_eq!(check("plain\ntext\n").unwrap(), MarkerCount::default());
        assert_eq!(check("").unwrap(), MarkerCount::default());
    }

    #[test]
    fn single_marker_is_valid() {
        let text = format!("a\n\n{MARKER}\n# Auto-updated: x\n\nb\n");
        assert_eq!(check(&text).unwrap(), MarkerCount { exact: 1, partial: 1 });
    }

    #[test]
    fn duplicate_marker_is_rejected() {
        let text = format!("{MARKER}\none\n{MARKER}\ntwo\n");
        assert_eq!(
            check(&text).unwrap_err(),
            IntegrityViolation::DuplicateMarker { count: 2, line: 3 }
        );
    }

    #[test]
    fn truncated_marker_is_rejected() {
        let truncated = &MARKER[..MARKER.len() - 8];
        let text = format!("a\n{truncated}\nb\n");
        match check(&text).unwrap_err() {
            IntegrityViolation::CorruptedMarker { line, content } => {
                assert_eq!(line, 2);
                assert_eq!(content, truncated);
            }
            other => panic!("unexpected violation: {other:?}"),
        }
    }

    #[test]
    fn marker_with_extra_characters_is_rejected() {
        let text = format!("{MARKER} \nbody\n");
        assert!(matches!(
            check(&text),
            Err(IntegrityViolation::CorruptedMarker { line: 1, .. })
        ));
    }

    #[test]
    fn exact_plus_corrupt_fragment_is_rejected() {
        let text = format!("{MARKER}\nsee BEGIN MANAGED TEMPLATE above\n");
        assert!(matches!(
            check(&text),
            Err(IntegrityViolation::CorruptedMarker { line: 2, .. })
        ));
    }

    #[test]
    fn missing_file_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_file(&dir.path().join("absent.md")).unwrap().is_none());
    }

    #[test]
    fn file_error_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.md");
        std::fs::write(&path, format!("{MARKER}\n{MARKER}\n")).unwrap();
        let err = check_file(&path).unwrap_err();
        assert!(err.to_string().contains("bad.md"), "{err}");
        assert!(matches!(err, MergeError::Integrity { .. }));
    }
}
