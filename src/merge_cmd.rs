//! `tmerge merge`: merge a template source into a target document.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tmerge::{MergeConfig, MergeOptions, MergeOutcome, MergeReport, Merger, lock};

use crate::format::OutputFormat;

/// Merge SOURCE's template into TARGET, preserving TARGET's custom region
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Template source file (an already-merged file is accepted)
    pub source: PathBuf,

    /// Document to update; created if missing
    pub target: PathBuf,

    /// Report what would happen without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Output format: text or json
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Shorthand for --format json
    #[arg(long, hide = true, conflicts_with = "format")]
    pub json: bool,
}

pub fn run(args: &MergeArgs, config: MergeConfig) -> Result<()> {
    let format = OutputFormat::with_json_flag(args.format, args.json);
    let merger = Merger::new(config).with_options(MergeOptions {
        dry_run: args.dry_run,
    });
    install_interrupt_handler(merger.lock_manager().path())?;

    let report = merger.merge(&args.source, &args.target)?;

    if format == OutputFormat::Json {
        println!("{}", format.serialize(&report)?);
    } else {
        print_text(&report);
    }
    Ok(())
}

/// Remove our lock record on Ctrl+C, SIGTERM or SIGHUP and exit with the
/// interrupt status.
pub fn install_interrupt_handler(lock_path: &Path) -> Result<()> {
    let lock_path = lock_path.to_owned();
    ctrlc::set_handler(move || {
        lock::release_if_held(&lock_path);
        std::process::exit(130);
    })
    .context("failed to install interrupt handler")
}

fn print_text(report: &MergeReport) {
    let target = report.target.display();
    let source = report.source.display();
    match report.outcome {
        MergeOutcome::Created => println!("created {target} from {source}"),
        MergeOutcome::Unchanged => println!("{target} is up to date"),
        MergeOutcome::Updated => println!("updated template region of {target} from {source}"),
        MergeOutcome::WouldCreate => println!("would create {target} from {source}"),
        MergeOutcome::WouldUpdate => {
            println!("would update template region of {target} from {source}");
        }
    }
    if let Some(backup) = &report.backup {
        println!("  backup kept: {}", backup.display());
    }
    if report.pruned > 0 {
        println!("  pruned {} old backup(s)", report.pruned);
    }
}
