use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tmerge::{MergeConfig, Merger};

use crate::format::OutputFormat;

/// Show the lock holder and the effective configuration
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output format: text or json
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Shorthand for --format json
    #[arg(long, hide = true, conflicts_with = "format")]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusEnvelope {
    version: &'static str,
    lock_path: PathBuf,
    lock_holder: Option<u32>,
    config: MergeConfig,
}

pub fn run(args: &StatusArgs, config: MergeConfig) -> Result<()> {
    let merger = Merger::new(config);
    let lock = merger.lock_manager();
    let envelope = StatusEnvelope {
        version: env!("CARGO_PKG_VERSION"),
        lock_path: lock.path().to_owned(),
        lock_holder: lock.holder(),
        config: merger.config().clone(),
    };

    let format = OutputFormat::with_json_flag(args.format, args.json);
    if format == OutputFormat::Json {
        println!("{}", format.serialize(&envelope)?);
        return Ok(());
    }

    println!("tmerge {}", envelope.version);
    match envelope.lock_holder {
        Some(pid) => println!("lock:      held by pid {pid} ({})", envelope.lock_path.display()),
        None => println!("lock:      free ({})", envelope.lock_path.display()),
    }
    let backup = &envelope.config.backup;
    println!(
        "backups:   {}",
        if backup.enabled { "enabled" } else { "disabled" }
    );
    println!("retention: {}h (grace {}h)", backup.retention_hours, backup.grace_hours);
    println!("max/file:  {}", backup.max_per_file);
    match &backup.dir {
        Some(dir) => println!("directory: {}", dir.display()),
        None => println!("directory: next to each target"),
    }
    Ok(())
}
