#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{bail, Result};
use idbak_core::backup::BackupJob;
use idbak_core::uploader::UploadTarget;
use idbak_core::util::{
    item_lines, Device, DeviceId, Quota, RemoteAccount, RemoteEntry, RemoteStore, TransferItem,
};

type Responder = Box<dyn Fn(&[PathBuf]) -> String>;

/// In-memory storage service that records what it was asked to do.
pub struct FakeStore {
    pub devices: Vec<Device>,
    pub quota: Quota,
    pub uploads: RefCell<Vec<Vec<PathBuf>>>,
    pub deletes: RefCell<Vec<Vec<PathBuf>>>,
    pub restores: RefCell<Vec<(Vec<PathBuf>, PathBuf)>>,
    pub remote_tree: HashMap<PathBuf, Vec<RemoteEntry>>,
    /// Deletion count reported back; `None` confirms the full batch.
    pub delete_confirmation: Option<Option<usize>>,
    pub fail_upload_after: Option<usize>,
    responder: Responder,
}

impl FakeStore {
    /// Every uploaded file is reported as a full transfer of 100 bytes.
    pub fn new() -> Self {
        Self::with_responder(Box::new(|files: &[PathBuf]| full_transfers(files, 100)))
    }

    pub fn with_responder(responder: Responder) -> Self {
        Self {
            devices: vec![Device {
                nick_name: "laptop".to_string(),
                device_id: "777".to_string(),
            }],
            quota: Quota {
                used: 3 << 30,
                total: 10 << 30,
            },
            uploads: RefCell::new(Vec::new()),
            deletes: RefCell::new(Vec::new()),
            restores: RefCell::new(Vec::new()),
            remote_tree: HashMap::new(),
            delete_confirmation: None,
            fail_upload_after: None,
            responder,
        }
    }

    pub fn uploaded_files(&self) -> Vec<PathBuf> {
        self.uploads.borrow().iter().flatten().cloned().collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.uploads.borrow().iter().map(Vec::len).collect()
    }
}

/// Render `<item>` lines with a running total of `size` bytes per file,
/// interleaved with progress noise.
pub fn full_transfers(files: &[PathBuf], size: u64) -> String {
    let mut out = String::from("Building file list...\n");
    let mut total = 0;
    for file in files {
        total += size;
        let name = file.to_string_lossy();
        let name = name.trim_start_matches('/');
        out.push_str(&format!(
            "<item per=\"40%\" fname=\"{name}\" trf_type=\"FULL\" rate_trf=\"0.5MB/s\" tottrf_sz=\"{}\"/>\n",
            total - size / 2
        ));
        out.push_str("  transferring...\n");
        out.push_str(&format!(
            "<item per=\"100%\" fname=\"{name}\" trf_type=\"FULL\" rate_trf=\"1.0MB/s\" tottrf_sz=\"{total}\"/>\n"
        ));
    }
    out
}

fn read_list(list_file: &Path) -> Result<Vec<PathBuf>> {
    Ok(fs::read_to_string(list_file)?
        .lines()
        .map(PathBuf::from)
        .collect())
}

impl RemoteStore for FakeStore {
    fn server_address(&self, _username: &str) -> Result<String> {
        Ok("198.51.100.4".to_string())
    }

    fn list_devices(&self, _account: &RemoteAccount) -> Result<Vec<Device>> {
        Ok(self.devices.clone())
    }

    fn upload_batch(
        &self,
        _device: &DeviceId,
        _account: &RemoteAccount,
        list_file: &Path,
    ) -> Result<Vec<TransferItem>> {
        if let Some(limit) = self.fail_upload_after {
            if self.uploads.borrow().len() >= limit {
                bail!("idevsutil_dedup upload failed with exit status: 1");
            }
        }

        let files = read_list(list_file)?;
        let output = (self.responder)(&files);
        self.uploads.borrow_mut().push(files);

        let items = item_lines(&output)
            .map(|line| TransferItem::parse("upload", line))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn quota(&self, _account: &RemoteAccount) -> Result<Quota> {
        Ok(self.quota)
    }

    fn list_dir(
        &self,
        _device: &DeviceId,
        _account: &RemoteAccount,
        dir: &Path,
    ) -> Result<Vec<RemoteEntry>> {
        Ok(self.remote_tree.get(dir).cloned().unwrap_or_default())
    }

    fn delete_items(
        &self,
        _device: &DeviceId,
        _account: &RemoteAccount,
        list_file: &Path,
    ) -> Result<Option<usize>> {
        let items = read_list(list_file)?;
        let count = items.len();
        self.deletes.borrow_mut().push(items);
        Ok(self.delete_confirmation.unwrap_or(Some(count)))
    }

    fn restore_items(
        &self,
        _device: &DeviceId,
        _account: &RemoteAccount,
        list_file: &Path,
        out_dir: &Path,
    ) -> Result<u64> {
        let items = read_list(list_file)?;
        let count = items.len() as u64;
        self.restores
            .borrow_mut()
            .push((items, out_dir.to_path_buf()));
        Ok(count * 10)
    }
}

pub fn job(includes: Vec<PathBuf>, excludes: Vec<PathBuf>, batch_size: usize) -> BackupJob {
    BackupJob {
        device_name: "laptop".to_string(),
        target: UploadTarget {
            device: DeviceId::from_raw("777"),
            account: RemoteAccount::new("alice", "198.51.100.4"),
        },
        includes,
        excludes,
        batch_size,
    }
}

pub fn dir_entry(name: &str) -> RemoteEntry {
    RemoteEntry {
        name: PathBuf::from(name),
        is_dir: true,
    }
}

pub fn file_entry(name: &str) -> RemoteEntry {
    RemoteEntry {
        name: PathBuf::from(name),
        is_dir: false,
    }
}

/// Create `count` small files named `file-NNNN.txt` below `dir`.
pub fn populate(dir: &Path, count: usize) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut files = Vec::with_capacity(count);
    for idx in 0..count {
        let path = dir.join(format!("file-{idx:04}.txt"));
        fs::write(&path, idx.to_string())?;
        files.push(path.canonicalize()?);
    }
    Ok(files)
}
