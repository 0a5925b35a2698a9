use std::path::{Path, PathBuf};

use eyre::{bail, Context, Result};

use crate::backup::BackupJob;
use crate::restore::{walk_remote, REMOTE_BATCH_SIZE};
use crate::util::{write_list_file, RemoteStore};
use crate::walker::TreeWalker;

/// Remove archived items that no longer exist locally or that are now
/// excluded. Returns the number of deleted items.
pub fn clean(job: &BackupJob, store: &dyn RemoteStore) -> Result<usize> {
    log::info!(
        "Cleaning archive of {} ({}) at {}...",
        job.device_name,
        job.target.device,
        job.target.account.server
    );

    let walker = job.walker();
    let mut items = Vec::new();
    let mut deleted = 0;

    walk_remote(job, store, Path::new("/"), |path| {
        if exists_and_not_excluded(&walker, &path) {
            return Ok(Some(path));
        }

        items.push(path);
        if items.len() == REMOTE_BATCH_SIZE {
            deleted += delete_batch(job, store, &items)?;
            items.clear();
        }
        Ok(None)
    })?;

    if !items.is_empty() {
        deleted += delete_batch(job, store, &items)?;
    }

    Ok(deleted)
}

fn exists_and_not_excluded(walker: &TreeWalker, path: &Path) -> bool {
    match path.canonicalize() {
        Ok(path) => walker.excluded_by(&path).is_none(),
        Err(_) => false,
    }
}

fn delete_batch(job: &BackupJob, store: &dyn RemoteStore, items: &[PathBuf]) -> Result<usize> {
    for item in items {
        log::info!("Deleting item {} from archive", item.display());
    }

    let list_file = write_list_file(items)?;
    let confirmed = store
        .delete_items(&job.target.device, &job.target.account, list_file.path())
        .wrap_err("failed to delete items")?;

    match confirmed {
        Some(count) if count == items.len() => Ok(count),
        Some(count) => bail!("deleted only {} of {} items", count, items.len()),
        None => bail!("deletion of {} items was not confirmed", items.len()),
    }
}
