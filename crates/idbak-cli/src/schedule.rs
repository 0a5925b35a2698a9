use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use eyre::{Context, Result};
use idbak_core::backup::{run_backup, BackupJob};
use idbak_core::logger::FileLogger;
use idbak_core::report::RunReport;
use idbak_core::state::{is_due, read_last_run, write_last_run};

use crate::context::AppContext;
use crate::notify::send_summary;

/// What a single scheduler pass did.
#[derive(Debug, PartialEq, Eq)]
pub enum Tick {
    /// The interval has not elapsed yet.
    Waiting,
    Ran,
    /// A run was attempted and failed; the failure was reported.
    Failed,
}

/// Check the marker and, when due, rewrite it and invoke `run`.
///
/// Errors from `run` are printed and reported as [`Tick::Failed`]; only
/// marker I/O errors are returned.
pub fn tick<F>(marker: &Path, interval: Duration, now: DateTime<Local>, run: F) -> Result<Tick>
where
    F: FnOnce() -> Result<()>,
{
    let last_run = read_last_run(marker)?;
    if !is_due(last_run.as_ref(), interval, &now) {
        return Ok(Tick::Waiting);
    }

    write_last_run(marker, &now)?;

    println!("Starting backup on {}...", now.format("%c"));
    match run() {
        Ok(()) => {
            println!("Completed backup on {}.", Local::now().format("%c"));
            Ok(Tick::Ran)
        }
        Err(err) => {
            eprintln!("Backup failed due to: {err:?}");
            Ok(Tick::Failed)
        }
    }
}

/// One backup run with its own log file, followed by the summary email.
pub fn run_once(ctx: &AppContext, job: &BackupJob, notify: bool) -> Result<RunReport> {
    let logger = FileLogger::create(&ctx.config.log_dir(), &Local::now())?;
    log::info!("Writing run log to {}", logger.path().display());

    let report = run_backup(job, &ctx.util, &logger)?;

    if notify {
        send_summary(&ctx.config, &report).wrap_err("failed to mail summary")?;
    }
    Ok(report)
}

/// Poll forever, running a backup whenever the interval has elapsed.
pub fn run_forever(ctx: &AppContext, job: &BackupJob) -> Result<()> {
    let marker = ctx.config.last_run_path();

    loop {
        let outcome = tick(&marker, ctx.config.interval, Local::now(), || {
            run_once(ctx, job, true).map(|_| ())
        });

        match outcome {
            Ok(Tick::Ran) | Ok(Tick::Failed) => {}
            Ok(Tick::Waiting) => thread::sleep(ctx.config.poll_interval),
            Err(err) => {
                eprintln!("[warn] scheduler error: {err:?}");
                thread::sleep(ctx.config.poll_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn stale_marker_triggers_a_run() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let marker = tmp.path().join("lastrun");
        let now = Local::now();
        write_last_run(&marker, &(now - chrono::Duration::seconds(7200)))?;

        let ran = Cell::new(false);
        let outcome = tick(&marker, HOUR, now, || {
            ran.set(true);
            Ok(())
        })?;

        assert_eq!(outcome, Tick::Ran);
        assert!(ran.get());
        let rewritten = read_last_run(&marker)?.expect("marker");
        assert_eq!(rewritten.timestamp(), now.timestamp());
        Ok(())
    }

    #[test]
    fn fresh_marker_waits() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let marker = tmp.path().join("lastrun");
        let now = Local::now();
        let recent = now - chrono::Duration::seconds(60);
        write_last_run(&marker, &recent)?;

        let outcome = tick(&marker, HOUR, now, || panic!("must not run"))?;

        assert_eq!(outcome, Tick::Waiting);
        assert_eq!(read_last_run(&marker)?.expect("marker").timestamp(), recent.timestamp());
        Ok(())
    }

    #[test]
    fn missing_marker_runs_immediately() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let marker = tmp.path().join("state/lastrun");

        let outcome = tick(&marker, HOUR, Local::now(), || Ok(()))?;

        assert_eq!(outcome, Tick::Ran);
        assert!(marker.exists());
        Ok(())
    }

    #[test]
    fn failed_run_is_reported_and_marker_kept() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let marker = tmp.path().join("lastrun");

        let outcome = tick(&marker, HOUR, Local::now(), || eyre::bail!("upload failed"))?;

        assert_eq!(outcome, Tick::Failed);
        assert!(marker.exists());
        Ok(())
    }
}
