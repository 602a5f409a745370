//! `tmerge backups`: list, prune and restore timestamped backups.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;
use tmerge::backup::BackupEntry;
use tmerge::{MergeConfig, Merger};

use crate::format::OutputFormat;
use crate::merge_cmd::install_interrupt_handler;

/// `tmerge backups` subcommands.
#[derive(Subcommand, Debug)]
pub enum BackupsCommands {
    /// List backups of TARGET, oldest first
    List {
        /// The merge target whose backups to list
        target: PathBuf,

        /// Output format: text or json
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Shorthand for --format json
        #[arg(long, hide = true, conflicts_with = "format")]
        json: bool,
    },

    /// Delete backups past the retention window or over the per-file limit
    ///
    /// Prunes every backup group in TARGET's backup directory.
    Prune {
        /// Any merge target in the backup directory to prune
        target: PathBuf,

        /// Output format: text or json
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Shorthand for --format json
        #[arg(long, hide = true, conflicts_with = "format")]
        json: bool,
    },

    /// Restore TARGET from a backup (the newest one by default)
    Restore {
        /// The file to restore
        target: PathBuf,

        /// Restore from this backup file instead of the newest
        #[arg(long)]
        from: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct ListedBackup<'a> {
    #[serde(flatten)]
    entry: &'a BackupEntry,
    created_at: String,
}

pub fn run(cmd: &BackupsCommands, config: MergeConfig) -> Result<()> {
    let merger = Merger::new(config);
    match cmd {
        BackupsCommands::List {
            target,
            format,
            json,
        } => {
            let entries = merger.backups().list(target)?;
            let listed: Vec<ListedBackup<'_>> = entries
                .iter()
                .map(|entry| ListedBackup {
                    entry,
                    created_at: human_time(entry.created),
                })
                .collect();
            let format = OutputFormat::with_json_flag(*format, *json);
            if format == OutputFormat::Json {
                println!("{}", format.serialize(&listed)?);
            } else if listed.is_empty() {
                println!("no backups of {}", target.display());
            } else {
                for b in &listed {
                    println!("{}  {}", b.created_at, b.entry.path.display());
                }
            }
            Ok(())
        }
        BackupsCommands::Prune {
            target,
            format,
            json,
        } => {
            install_interrupt_handler(merger.lock_manager().path())?;
            let lock = merger.lock_manager().acquire()?;
            let report = merger
                .backups()
                .prune(&merger.backups().dir_for(target), now_secs());
            lock.release();

            let format = OutputFormat::with_json_flag(*format, *json);
            if format == OutputFormat::Json {
                println!("{}", format.serialize(&report)?);
            } else {
                println!(
                    "pruned {} backup(s): {} expired, {} over limit",
                    report.removed(),
                    report.expired.len(),
                    report.over_limit.len()
                );
                for (path, reason) in &report.failed {
                    eprintln!("  could not remove {}: {reason}", path.display());
                }
            }
            Ok(())
        }
        BackupsCommands::Restore { target, from } => {
            install_interrupt_handler(merger.lock_manager().path())?;
            let used = merger.restore(target, from.as_deref())?;
            println!("restored {} from {}", target.display(), used.display());
            Ok(())
        }
    }
}

fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

fn human_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .map_or_else(
            || secs.to_string(),
            |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_time_formats_utc() {
        assert_eq!(human_time(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(human_time(1_700_000_000), "2023-11-14 22:13:20 UTC");
    }
}
