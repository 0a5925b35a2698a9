mod bootstrap;
mod cli;
mod context;
mod notify;
mod schedule;

use clap::Parser;
use eyre::{Context, Result};
use idbak_core::{clean, restore};
use std::thread;

use crate::cli::{Cli, Commands};
use crate::context::AppContext;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let ctx = AppContext::load(&cli)?;
    let command = cli.command.unwrap_or(Commands::Run);

    if matches!(command, Commands::Run) && !ctx.config.startup_delay.is_zero() {
        log::info!(
            "Waiting {}s for the network before the first run...",
            ctx.config.startup_delay.as_secs()
        );
        thread::sleep(ctx.config.startup_delay);
    }

    bootstrap::ensure_util(&ctx.config.util_path)
        .wrap_err("failed to download idevsutil_dedup")?;

    let job = ctx.connect()?;

    match command {
        Commands::Run => schedule::run_forever(&ctx, &job),
        Commands::Backup(args) => {
            let report = schedule::run_once(&ctx, &job, !args.no_notify)?;
            println!("{}", report.summary());
            Ok(())
        }
        Commands::Restore(args) => {
            restore::restore(&job, &ctx.util, &args.dir)?;
            Ok(())
        }
        Commands::RestoreMissing(args) => {
            let restored =
                restore::restore_missing(&job, &ctx.util, &args.sub_dir, &args.out_dir)?;
            println!("Restored {restored} missing items.");
            Ok(())
        }
        Commands::Clean => {
            let deleted = clean::clean(&job, &ctx.util)?;
            println!("Deleted {deleted} items from the archive.");
            Ok(())
        }
    }
}
