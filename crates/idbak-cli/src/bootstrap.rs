use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::path::Path;
use std::time::Duration;

use eyre::{Context, Result};

const DOWNLOAD_URL: &str =
    "https://www.idrivedownloads.com/downloads/linux/download-options/IDrive_linux_64bit.zip";
const ARCHIVE_MEMBER: &str = "IDrive_linux_64bit/idevsutil_dedup";

/// Download and unpack the utility unless `util_path` already exists.
pub fn ensure_util(util_path: &Path) -> Result<()> {
    if util_path.exists() {
        return Ok(());
    }

    if let Some(dir) = util_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    eprintln!("Downloading idevsutil_dedup...");

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .context("failed to build HTTP client")?;
    let archive = client
        .get(DOWNLOAD_URL)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .with_context(|| format!("failed to download {DOWNLOAD_URL}"))?;

    extract_util(Cursor::new(archive), util_path)
}

/// Copy the utility out of the vendor archive to `util_path` and mark it
/// executable. A partially written file never replaces `util_path`.
pub fn extract_util<R: Read + Seek>(archive: R, util_path: &Path) -> Result<()> {
    let mut archive = zip::ZipArchive::new(archive).context("failed to open utility archive")?;
    let mut member = archive
        .by_name(ARCHIVE_MEMBER)
        .with_context(|| format!("archive does not contain {ARCHIVE_MEMBER}"))?;

    let partial = util_path.with_extension("part");
    let written = File::create(&partial)
        .and_then(|mut file| io::copy(&mut member, &mut file))
        .with_context(|| format!("failed to write {}", partial.display()));
    if let Err(err) = written {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }

    make_executable(&partial)?;
    fs::rename(&partial, util_path)
        .with_context(|| format!("failed to move utility to {}", util_path.display()))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to mark {} executable", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
