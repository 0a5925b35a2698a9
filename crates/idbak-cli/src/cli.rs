use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "idbak")]
#[command(about = "Scheduled backups to an IDrive deduplicating account")]
#[command(after_help = "Run '<command> --help' for detailed options on each command.")]
pub struct Cli {
    /// Override the configuration directory for this invocation
    #[arg(long, global = true, value_name = "PATH")]
    pub config_dir: Option<PathBuf>,
    /// Configuration file (defaults to <config dir>/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up whenever the configured interval has elapsed (default)
    Run,
    /// Run a single backup now, ignoring the last-run marker
    Backup(BackupArgs),
    /// Restore the complete backup into a local directory
    Restore(RestoreArgs),
    /// Restore archived files that no longer exist locally
    RestoreMissing(RestoreMissingArgs),
    /// Delete archived items that no longer exist locally or are excluded
    Clean,
}

#[derive(Args, Clone, Debug)]
pub struct BackupArgs {
    /// Do not send the summary email
    #[arg(long)]
    pub no_notify: bool,
}

#[derive(Args, Clone, Debug)]
pub struct RestoreArgs {
    /// Directory receiving the restored files
    #[arg(default_value = "restored_files")]
    pub dir: PathBuf,
}

#[derive(Args, Clone, Debug)]
pub struct RestoreMissingArgs {
    /// Remote directory to scan for missing files
    pub sub_dir: PathBuf,
    /// Directory receiving the restored files
    pub out_dir: PathBuf,
}
