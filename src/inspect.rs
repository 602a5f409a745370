//! Read-only commands: `check`, `fingerprint`, `normalize`.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tmerge::error::MergeError;
use tmerge::integrity::{self, IntegrityViolation};
use tmerge::{Document, document};

use crate::format::OutputFormat;

/// Exit status when at least one checked file is invalid.
const CHECK_FAILED: u8 = 3;

/// Verify that each FILE carries at most one intact marker
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Files to check (missing files are reported as valid)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format: text or json
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Shorthand for --format json
    #[arg(long, hide = true, conflicts_with = "format")]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    path: PathBuf,
    exists: bool,
    valid: bool,
    markers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    problem: Option<String>,
}

/// Returns the process exit status: 0 when every file is valid.
pub fn check(args: &CheckArgs) -> Result<u8> {
    let format = OutputFormat::with_json_flag(args.format, args.json);
    let mut results = Vec::with_capacity(args.files.len());
    for path in &args.files {
        results.push(check_one(path)?);
    }

    if format == OutputFormat::Json {
        println!("{}", format.serialize(&results)?);
    } else {
        for r in &results {
            match (&r.problem, r.exists) {
                (Some(problem), _) => eprintln!("{}: {problem}", r.path.display()),
                (None, false) => println!("{}: absent", r.path.display()),
                (None, true) => println!("{}: ok ({} marker)", r.path.display(), r.markers),
            }
        }
    }

    Ok(if results.iter().all(|r| r.valid) {
        0
    } else {
        CHECK_FAILED
    })
}

fn check_one(path: &Path) -> Result<CheckResult, MergeError> {
    match integrity::check_file(path) {
        Ok(Some(count)) => Ok(CheckResult {
            path: path.to_owned(),
            exists: true,
            valid: true,
            markers: count.exact,
            problem: None,
        }),
        Ok(None) => Ok(CheckResult {
            path: path.to_owned(),
            exists: false,
            valid: true,
            markers: 0,
            problem: None,
        }),
        Err(MergeError::Integrity { violation, .. }) => Ok(CheckResult {
            path: path.to_owned(),
            exists: true,
            valid: false,
            markers: match violation {
                IntegrityViolation::DuplicateMarker { count, .. } => count,
                IntegrityViolation::CorruptedMarker { .. } => 0,
            },
            problem: Some(violation.to_string()),
        }),
        Err(e) => Err(e),
    }
}

/// Print the fingerprint of FILE's template region
#[derive(Args, Debug)]
pub struct FingerprintArgs {
    /// File to fingerprint
    pub file: PathBuf,
}

pub fn fingerprint(args: &FingerprintArgs) -> Result<()> {
    let text = read_checked(&args.file)?;
    match Document::parse(&text).fingerprint() {
        Some(fp) => println!("{fp}"),
        None => println!("none"),
    }
    Ok(())
}

/// Print FILE with any merged template region stripped
#[derive(Args, Debug)]
pub struct NormalizeArgs {
    /// File to normalize
    pub file: PathBuf,
}

pub fn normalize(args: &NormalizeArgs) -> Result<()> {
    let text = read_checked(&args.file)?;
    let mut out = std::io::stdout().lock();
    out.write_all(document::normalize(&text).as_bytes())?;
    out.flush()?;
    Ok(())
}

fn read_checked(path: &Path) -> Result<String, MergeError> {
    let text = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MergeError::SourceMissing {
                path: path.to_owned(),
            }
        } else {
            MergeError::io("read", path, e)
        }
    })?;
    integrity::check_text(path, &text)?;
    Ok(text)
}
