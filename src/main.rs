use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tmerge::{MergeConfig, MergeError, telemetry};

mod backups_cmd;
mod format;
mod inspect;
mod merge_cmd;
mod status;

/// Template merge tool
///
/// Keeps a shared template in sync across documents that also carry their
/// own hand-written content. Everything above the marker line belongs to the
/// document's owner; everything below it is replaced on merge.
///
/// QUICK START:
///
///   tmerge merge templates/CLAUDE.md project/CLAUDE.md
///   tmerge check project/CLAUDE.md
///   tmerge backups list project/CLAUDE.md
///
/// Merging is idempotent: running the same merge twice leaves the target
/// untouched the second time. Every write is preceded by a backup and done
/// atomically; a failed merge restores the target from that backup.
#[derive(Parser)]
#[command(name = "tmerge")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'tmerge <command> --help' for more information on a specific command.")]
struct Cli {
    /// Configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, env = "TMERGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a template source into a target document
    Merge(merge_cmd::MergeArgs),

    /// Check files for duplicated or damaged markers
    Check(inspect::CheckArgs),

    /// Print the fingerprint of a file's template region
    Fingerprint(inspect::FingerprintArgs),

    /// Print a file with its merged template region stripped
    Normalize(inspect::NormalizeArgs),

    /// Manage timestamped backups
    #[command(subcommand)]
    Backups(backups_cmd::BackupsCommands),

    /// Show the lock holder and the effective configuration
    Status(status::StatusArgs),

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

fn main() -> ExitCode {
    telemetry::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => report(&err),
    }
}

fn run(cli: &Cli) -> Result<u8> {
    let config = cli.config.as_deref();
    match &cli.command {
        Commands::Check(args) => return inspect::check(args),
        Commands::Fingerprint(args) => inspect::fingerprint(args)?,
        Commands::Normalize(args) => inspect::normalize(args)?,
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "tmerge", &mut std::io::stdout());
        }
        Commands::Merge(args) => merge_cmd::run(args, load_config(config)?)?,
        Commands::Backups(cmd) => backups_cmd::run(cmd, load_config(config)?)?,
        Commands::Status(args) => status::run(args, load_config(config)?)?,
    }
    Ok(0)
}

fn load_config(path: Option<&Path>) -> Result<MergeConfig, MergeError> {
    MergeConfig::resolve(path).map_err(MergeError::from)
}

/// Print the error and map it to the exit status for its kind.
fn report(err: &anyhow::Error) -> ExitCode {
    if let Some(merge_err) = err.downcast_ref::<MergeError>() {
        eprintln!("error: {merge_err}");
        let code = u8::try_from(merge_err.exit_code()).unwrap_or(1);
        return ExitCode::from(code);
    }
    eprintln!("error: {err:#}");
    ExitCode::FAILURE
}
