use std::path::{Path, PathBuf};

use eyre::{Context, Result};

use crate::backup::BackupJob;
use crate::uploader::format_size;
use crate::util::{write_list_file, RemoteStore};

/// Items per restore or delete request when walking the remote tree.
pub const REMOTE_BATCH_SIZE: usize = 100;

/// Depth-first walk of the remote archive below `dir`.
///
/// `visit` receives the absolute remote path of every entry and returns the
/// path to descend into (directories only), or `None` to prune it.
pub fn walk_remote<F>(
    job: &BackupJob,
    store: &dyn RemoteStore,
    dir: &Path,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(PathBuf) -> Result<Option<PathBuf>>,
{
    let mut dirs = vec![dir.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let entries = store
            .list_dir(&job.target.device, &job.target.account, &dir)
            .with_context(|| format!("failed to list remote directory {}", dir.display()))?;

        for entry in entries {
            let path = dir.join(&entry.name);
            if let Some(path) = visit(path)? {
                if entry.is_dir {
                    dirs.push(path);
                }
            }
        }
    }

    Ok(())
}

/// Restore the complete archive of the device into `out_dir`.
pub fn restore(job: &BackupJob, store: &dyn RemoteStore, out_dir: &Path) -> Result<u64> {
    log::info!(
        "Restoring backup of {} ({}) from {}...",
        job.device_name,
        job.target.device,
        job.target.account.server
    );

    let entries = store
        .list_dir(&job.target.device, &job.target.account, Path::new("/"))
        .wrap_err("failed to list remote root")?;
    let list_file = write_list_file(entries.iter().map(|entry| entry.name.as_path()))?;

    let transferred = store
        .restore_items(
            &job.target.device,
            &job.target.account,
            list_file.path(),
            out_dir,
        )
        .wrap_err("failed to restore files")?;

    let (size, unit) = format_size(transferred);
    log::info!("Transferred {size:.1} {unit} during restore.");
    Ok(transferred)
}

/// Restore the files below the remote `sub_dir` that no longer exist
/// locally. Returns the number of restored items.
pub fn restore_missing(
    job: &BackupJob,
    store: &dyn RemoteStore,
    sub_dir: &Path,
    out_dir: &Path,
) -> Result<usize> {
    log::info!(
        "Restoring missing files from backup of {} ({}) from {}...",
        job.device_name,
        job.target.device,
        job.target.account.server
    );

    let mut items = Vec::new();
    let mut restored = 0;

    walk_remote(job, store, sub_dir, |path| {
        if path.canonicalize().is_err() {
            log::info!("Restoring item {} from archive", path.display());
            items.push(path.clone());

            if items.len() == REMOTE_BATCH_SIZE {
                restore_batch(job, store, out_dir, &items)?;
                restored += items.len();
                items.clear();
            }
        }

        Ok(Some(path))
    })?;

    if !items.is_empty() {
        restore_batch(job, store, out_dir, &items)?;
        restored += items.len();
    }

    Ok(restored)
}

fn restore_batch(
    job: &BackupJob,
    store: &dyn RemoteStore,
    out_dir: &Path,
    items: &[PathBuf],
) -> Result<()> {
    let list_file = write_list_file(items)?;
    let transferred = store
        .restore_items(
            &job.target.device,
            &job.target.account,
            list_file.path(),
            out_dir,
        )
        .wrap_err("failed to restore items")?;

    let (size, unit) = format_size(transferred);
    log::info!("Transferred {size:.1} {unit} during restore.");
    Ok(())
}
