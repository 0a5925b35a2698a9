use std::path::PathBuf;

use chrono::Local;
use eyre::{Context, Result};

use crate::config::AgentConfig;
use crate::logger::Logger;
use crate::report::RunReport;
use crate::stats::RunStats;
use crate::uploader::{BatchUploader, UploadTarget};
use crate::util::{resolve_device, RemoteAccount, RemoteStore};
use crate::walker::TreeWalker;

/// Everything a run needs once the server and device are resolved.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub device_name: String,
    pub target: UploadTarget,
    pub includes: Vec<PathBuf>,
    pub excludes: Vec<PathBuf>,
    pub batch_size: usize,
}

impl BackupJob {
    /// Resolve the storage server and the device identifier. Either failing
    /// is fatal for the process.
    pub fn connect(config: &AgentConfig, store: &dyn RemoteStore) -> Result<Self> {
        let server = store
            .server_address(&config.username)
            .wrap_err("failed to determine server address")?;
        log::info!("Using IDrive server {server}...");

        let account = RemoteAccount::new(config.username.clone(), server);
        let device = resolve_device(store, &account, &config.device_name)
            .wrap_err("failed to determine device ID")?;
        log::info!("Using device ID {device} ({})...", config.device_name);

        Ok(Self {
            device_name: config.device_name.clone(),
            target: UploadTarget { device, account },
            includes: config.includes.clone(),
            excludes: config.excludes.clone(),
            batch_size: config.batch_size,
        })
    }

    pub fn walker(&self) -> TreeWalker {
        TreeWalker::new(&self.includes, &self.excludes)
    }
}

/// Execute one backup run: walk, upload in batches, fetch the quota and
/// render the summary. The summary is also written to `logger`.
pub fn run_backup(
    job: &BackupJob,
    store: &dyn RemoteStore,
    logger: &dyn Logger,
) -> Result<RunReport> {
    let start = Local::now();
    let hostname = local_hostname()?;

    logger.note(&format!(
        "Starting backup from {hostname} to {} ({}) on {}...",
        job.device_name,
        job.target.device,
        start.format("%c")
    ));

    let mut stats = RunStats::default();
    let mut uploader = BatchUploader::new(store, &job.target, job.batch_size);

    job.walker()
        .walk(logger, |path| uploader.push(path, &mut stats, logger))?;
    uploader.finish(&mut stats, logger)?;

    let end = Local::now();
    let quota = store
        .quota(&job.target.account)
        .wrap_err("failed to get quota")?;

    let report = RunReport {
        device_name: job.device_name.clone(),
        hostname,
        start,
        end,
        stats,
        quota,
    };

    logger.note(&report.outcome_line());
    logger.note(&report.summary());

    Ok(report)
}

pub fn local_hostname() -> Result<String> {
    let name = hostname::get().context("failed to determine host name")?;
    Ok(name.to_string_lossy().into_owned())
}
