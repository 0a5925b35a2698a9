//! Adapter around the `idevsutil_dedup` command-line utility.
//!
//! The utility prints free text mixed with XML fragments. Two response
//! shapes exist: a single `<tree .../>` document preceded by arbitrary
//! preamble, and a stream of one-line `<item .../>` records interleaved with
//! progress noise. [`parse_tree`] and [`parse_items`] implement exactly
//! those two rules and nothing more; anything that does not decode after
//! filtering is an error.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use eyre::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tempfile::{NamedTempFile, TempDir};

use crate::config::{AgentConfig, Secret};
use crate::errors::UtilError;

const TREE_MARKER: &str = "<tree";
const ITEM_PREFIX: &str = "<item";
const DEVICE_ID_PREFIX: &str = "5c0b";
const DEVICE_ID_SUFFIX: &str = "4b5z";

/// Account on the resolved storage server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAccount {
    pub username: String,
    pub server: String,
}

impl RemoteAccount {
    pub fn new(username: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            server: server.into(),
        }
    }

    /// `user@server::home<dir>` for an absolute remote directory.
    pub fn home_path(&self, dir: &Path) -> OsString {
        make_arg(&format!("{}@{}::home", self.username, self.server), dir)
    }
}

impl fmt::Display for RemoteAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}::home/", self.username, self.server)
    }
}

/// Identifier of the backup destination as the utility expects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap the raw `device_id` attribute of a device listing.
    pub fn from_raw(raw: &str) -> Self {
        Self(format!("{DEVICE_ID_PREFIX}{raw}{DEVICE_ID_SUFFIX}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Device {
    #[serde(rename = "@nick_name")]
    pub nick_name: String,
    #[serde(rename = "@device_id")]
    pub device_id: String,
}

/// Remote storage usage, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Quota {
    #[serde(rename = "@usedquota")]
    pub used: u64,
    #[serde(rename = "@totalquota")]
    pub total: u64,
}

impl Quota {
    pub fn used_gib(&self) -> u64 {
        self.used >> 30
    }

    pub fn total_gib(&self) -> u64 {
        self.total >> 30
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferType {
    Full,
    Incremental,
    InSync,
    Other(String),
}

impl TransferType {
    pub fn parse(value: &str) -> Self {
        match value {
            "FULL" => TransferType::Full,
            "INCREMENTAL" => TransferType::Incremental,
            "FILE IN SYNC" => TransferType::InSync,
            other => TransferType::Other(other.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct RawTransfer {
    #[serde(rename = "@per")]
    percentage: String,
    #[serde(rename = "@fname")]
    file_name: String,
    #[serde(rename = "@trf_type")]
    transfer_type: String,
    #[serde(rename = "@rate_trf")]
    rate: String,
    #[serde(rename = "@tottrf_sz")]
    total_size: u64,
}

/// One progress record of an upload. Only records at `100%` describe the
/// final outcome for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub percentage: String,
    pub file_name: String,
    pub transfer_type: TransferType,
    pub rate: String,
    /// Bytes transferred so far in the current batch, all files included.
    pub total_size: u64,
    /// The record as printed by the utility.
    pub raw: String,
}

impl TransferItem {
    pub fn is_complete(&self) -> bool {
        self.percentage == "100%"
    }

    /// Decode one `<item .../>` line.
    pub fn parse(operation: &str, line: &str) -> Result<Self, UtilError> {
        let raw: RawTransfer = parse_record(operation, line)?;
        Ok(Self {
            percentage: raw.percentage,
            file_name: raw.file_name,
            transfer_type: TransferType::parse(&raw.transfer_type),
            rate: raw.rate,
            total_size: raw.total_size,
            raw: line.to_string(),
        })
    }
}

/// Entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: PathBuf,
    pub is_dir: bool,
}

#[derive(Deserialize)]
struct RawResource {
    #[serde(rename = "@restype")]
    kind: String,
    #[serde(rename = "@fname")]
    name: PathBuf,
}

#[derive(Deserialize)]
struct RawDeletion {
    #[serde(rename = "@tot_items_deleted")]
    items_deleted: Option<usize>,
}

#[derive(Deserialize)]
struct RawRestore {
    #[serde(rename = "@tottrf_sz")]
    total_size: u64,
}

/// Operations the agent needs from the storage service.
pub trait RemoteStore {
    /// Resolve the storage server that hosts `username`.
    fn server_address(&self, username: &str) -> Result<String>;

    fn list_devices(&self, account: &RemoteAccount) -> Result<Vec<Device>>;

    /// Upload every path listed (one per line) in `list_file`.
    fn upload_batch(
        &self,
        device: &DeviceId,
        account: &RemoteAccount,
        list_file: &Path,
    ) -> Result<Vec<TransferItem>>;

    fn quota(&self, account: &RemoteAccount) -> Result<Quota>;

    /// List the immediate children of the absolute remote directory `dir`.
    fn list_dir(
        &self,
        device: &DeviceId,
        account: &RemoteAccount,
        dir: &Path,
    ) -> Result<Vec<RemoteEntry>>;

    /// Delete the listed items; returns the confirmed deletion count, if any.
    fn delete_items(
        &self,
        device: &DeviceId,
        account: &RemoteAccount,
        list_file: &Path,
    ) -> Result<Option<usize>>;

    /// Restore the listed items below `out_dir`; returns bytes transferred.
    fn restore_items(
        &self,
        device: &DeviceId,
        account: &RemoteAccount,
        list_file: &Path,
        out_dir: &Path,
    ) -> Result<u64>;
}

/// Map a device nickname to its identifier.
pub fn resolve_device(
    store: &dyn RemoteStore,
    account: &RemoteAccount,
    device_name: &str,
) -> Result<DeviceId> {
    let devices = store
        .list_devices(account)
        .wrap_err("failed to list devices")?;

    devices
        .iter()
        .find(|device| device.nick_name == device_name)
        .map(|device| DeviceId::from_raw(&device.device_id))
        .ok_or_else(|| eyre::eyre!("failed to map device name {device_name} to a device ID"))
}

/// Subprocess-backed [`RemoteStore`].
#[derive(Debug, Clone)]
pub struct IdevsUtil {
    binary: PathBuf,
    password: Secret,
    encryption_key: Secret,
}

impl IdevsUtil {
    pub fn new(binary: impl Into<PathBuf>, password: Secret, encryption_key: Secret) -> Self {
        Self {
            binary: binary.into(),
            password,
            encryption_key,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.util_path.clone(),
            config.password.clone(),
            config.encryption_key.clone(),
        )
    }

    /// Invoke the utility and return its standard output.
    ///
    /// Credentials are handed over through temporary files that are removed
    /// when this function returns, whether the call succeeded or not.
    pub fn run<I, S>(&self, operation: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let pass_file = NamedTempFile::new().context("create password file")?;
        fs::write(pass_file.path(), self.password.expose()).context("write password file")?;

        let key_file = NamedTempFile::new().context("create key file")?;
        fs::write(key_file.path(), self.encryption_key.expose()).context("write key file")?;

        let temp_dir = TempDir::new().context("create scratch directory")?;

        log::debug!("running {} {}", self.binary.display(), operation);

        let output = Command::new(&self.binary)
            .arg(make_arg("--password-file=", pass_file.path()))
            .arg(make_arg("--pvt-key=", key_file.path()))
            .arg(make_arg("--temp=", temp_dir.path()))
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to launch {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                log::warn!("{} {}: {}", self.binary.display(), operation, stderr.trim());
            }
            return Err(UtilError::Status {
                operation: operation.to_string(),
                status: output.status,
            }
            .into());
        }

        String::from_utf8(output.stdout).map_err(|_| {
            UtilError::Utf8 {
                operation: operation.to_string(),
            }
            .into()
        })
    }
}

impl RemoteStore for IdevsUtil {
    fn server_address(&self, username: &str) -> Result<String> {
        const OP: &str = "--getServerAddress";

        #[derive(Deserialize)]
        struct ServerAddress {
            #[serde(rename = "@cmdUtilityServerIP")]
            address: Option<String>,
        }

        let output = self.run(OP, [OP, username])?;
        let tree: ServerAddress = parse_tree(OP, &output)?;
        tree.address.ok_or_else(|| {
            UtilError::Missing {
                operation: OP.to_string(),
                what: "cmdUtilityServerIP".to_string(),
            }
            .into()
        })
    }

    fn list_devices(&self, account: &RemoteAccount) -> Result<Vec<Device>> {
        const OP: &str = "--list-device";
        let output = self.run(OP, [OsString::from(OP), OsString::from(account.to_string())])?;
        Ok(parse_items(OP, &output)?)
    }

    fn upload_batch(
        &self,
        device: &DeviceId,
        account: &RemoteAccount,
        list_file: &Path,
    ) -> Result<Vec<TransferItem>> {
        const OP: &str = "upload";
        let output = self.run(
            OP,
            [
                OsString::from("--xml-output"),
                OsString::from("--type"),
                make_arg("--device-id=", device.as_str()),
                make_arg("--files-from=", list_file),
                OsString::from("--relative"),
                OsString::from("/"),
                OsString::from(account.to_string()),
            ],
        )?;

        let items = item_lines(&output)
            .map(|line| TransferItem::parse(OP, line))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn quota(&self, account: &RemoteAccount) -> Result<Quota> {
        const OP: &str = "--get-quota";
        let output = self.run(OP, [OsString::from(OP), OsString::from(account.to_string())])?;
        Ok(parse_tree(OP, &output)?)
    }

    fn list_dir(
        &self,
        device: &DeviceId,
        account: &RemoteAccount,
        dir: &Path,
    ) -> Result<Vec<RemoteEntry>> {
        const OP: &str = "--auth-list";
        let output = self.run(
            OP,
            [
                OsString::from(OP),
                OsString::from("--xml-output"),
                make_arg("--device-id=", device.as_str()),
                account.home_path(dir),
            ],
        )?;

        let resources: Vec<RawResource> = parse_items(OP, &output)?;
        Ok(resources
            .into_iter()
            .filter_map(|resource| match resource.kind.as_str() {
                "D" => Some(RemoteEntry {
                    name: resource.name,
                    is_dir: true,
                }),
                "F" => Some(RemoteEntry {
                    name: resource.name,
                    is_dir: false,
                }),
                kind => {
                    log::warn!(
                        "skipping {} of unknown resource type {kind}",
                        resource.name.display()
                    );
                    None
                }
            })
            .collect())
    }

    fn delete_items(
        &self,
        device: &DeviceId,
        account: &RemoteAccount,
        list_file: &Path,
    ) -> Result<Option<usize>> {
        const OP: &str = "--delete-items";
        let output = self.run(
            OP,
            [
                OsString::from(OP),
                OsString::from("--xml-output"),
                make_arg("--files-from=", list_file),
                OsString::from("--relative"),
                make_arg("--device-id=", device.as_str()),
                OsString::from(account.to_string()),
            ],
        )?;

        let operations: Vec<RawDeletion> = parse_items(OP, &output)?;
        Ok(operations
            .into_iter()
            .find_map(|operation| operation.items_deleted))
    }

    fn restore_items(
        &self,
        device: &DeviceId,
        account: &RemoteAccount,
        list_file: &Path,
        out_dir: &Path,
    ) -> Result<u64> {
        const OP: &str = "restore";
        let output = self.run(
            OP,
            [
                OsString::from("--xml-output"),
                make_arg("--files-from=", list_file),
                make_arg("--device-id=", device.as_str()),
                OsString::from(account.to_string()),
                out_dir.as_os_str().to_os_string(),
            ],
        )?;

        let transfers: Vec<RawRestore> = parse_items(OP, &output)?;
        Ok(transfers
            .iter()
            .map(|transfer| transfer.total_size)
            .max()
            .unwrap_or(0))
    }
}

/// Decode a single-document response, discarding any preamble before the
/// first `<tree`.
pub fn parse_tree<T: DeserializeOwned>(operation: &str, output: &str) -> Result<T, UtilError> {
    let Some(pos) = output.find(TREE_MARKER) else {
        return Err(UtilError::MissingTree {
            operation: operation.to_string(),
        });
    };
    parse_record(operation, output[pos..].trim_end())
}

/// Decode every line starting with `<item`; other lines are ignored.
pub fn parse_items<T: DeserializeOwned>(
    operation: &str,
    output: &str,
) -> Result<Vec<T>, UtilError> {
    item_lines(output)
        .map(|line| parse_record(operation, line))
        .collect()
}

/// Lines of `output` that carry one `<item .../>` record each.
pub fn item_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().filter(|line| line.starts_with(ITEM_PREFIX))
}

fn parse_record<T: DeserializeOwned>(operation: &str, record: &str) -> Result<T, UtilError> {
    quick_xml::de::from_str(record).map_err(|err| UtilError::Parse {
        operation: operation.to_string(),
        record: record.to_string(),
        message: err.to_string(),
    })
}

/// Write `paths` one per line into a fresh temporary file.
pub fn write_list_file<I, P>(paths: I) -> Result<NamedTempFile>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let list_file = NamedTempFile::new().context("create file list")?;
    {
        let mut writer = BufWriter::new(list_file.as_file());
        for path in paths {
            writer.write_all(path_bytes(path.as_ref()).as_ref())?;
            writer.write_all(b"\n")?;
        }
        writer.flush().context("write file list")?;
    }
    Ok(list_file)
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    std::borrow::Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    match path.to_string_lossy() {
        std::borrow::Cow::Borrowed(text) => std::borrow::Cow::Borrowed(text.as_bytes()),
        std::borrow::Cow::Owned(text) => std::borrow::Cow::Owned(text.into_bytes()),
    }
}

fn make_arg<S: AsRef<OsStr>>(prefix: &str, value: S) -> OsString {
    let mut arg = OsString::from(prefix);
    arg.push(value);
    arg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_preamble_is_discarded() {
        let output = "Connecting...\nok\n<tree cmdUtilityServerIP=\"10.1.2.3\" message=\"SUCCESS\"/>\n";

        #[derive(Deserialize)]
        struct Address {
            #[serde(rename = "@cmdUtilityServerIP")]
            address: String,
        }

        let tree: Address = parse_tree("--getServerAddress", output).expect("tree");
        assert_eq!(tree.address, "10.1.2.3");
    }

    #[test]
    fn missing_tree_is_an_error() {
        let err = parse_tree::<Quota>("--get-quota", "no xml here\n").unwrap_err();
        assert!(matches!(err, UtilError::MissingTree { .. }));
    }

    #[test]
    fn quota_is_decoded_from_tree() {
        let output = "<tree usedquota=\"3221225472\" totalquota=\"10737418240\"/>";
        let quota: Quota = parse_tree("--get-quota", output).expect("quota");
        assert_eq!(quota.used_gib(), 3);
        assert_eq!(quota.total_gib(), 10);
    }

    #[test]
    fn item_lines_skip_progress_noise() {
        let output = "\
Building file list...
<item nick_name=\"laptop\" device_id=\"123\"/>
  42% 1.2MB/s
<item nick_name=\"desktop\" device_id=\"456\"/>
";
        let devices: Vec<Device> = parse_items("--list-device", output).expect("devices");
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].nick_name, "desktop");
        assert_eq!(devices[1].device_id, "456");
    }

    #[test]
    fn malformed_item_is_an_error() {
        let output = "<item nick_name=\"laptop\" device_id=\"1\"/>\n<item nick_name=\n";
        let err = parse_items::<Device>("--list-device", output).unwrap_err();
        assert!(matches!(err, UtilError::Parse { .. }));
    }

    #[test]
    fn transfer_item_keeps_raw_record() {
        let line = "<item per=\"100%\" fname=\"home/a/f1.txt\" trf_type=\"FULL\" rate_trf=\"1.0MB/s\" tottrf_sz=\"1000\"/>";
        let item = TransferItem::parse("upload", line).expect("item");
        assert!(item.is_complete());
        assert_eq!(item.transfer_type, TransferType::Full);
        assert_eq!(item.total_size, 1000);
        assert_eq!(item.raw, line);
    }

    #[test]
    fn transfer_types_are_classified() {
        assert_eq!(TransferType::parse("INCREMENTAL"), TransferType::Incremental);
        assert_eq!(TransferType::parse("FILE IN SYNC"), TransferType::InSync);
        assert_eq!(
            TransferType::parse("FAILED"),
            TransferType::Other("FAILED".to_string())
        );
    }

    #[test]
    fn device_id_wraps_raw_identifier() {
        assert_eq!(DeviceId::from_raw("1234").as_str(), "5c0b12344b5z");
    }

    #[test]
    fn account_addresses_home() {
        let account = RemoteAccount::new("alice", "10.0.0.1");
        assert_eq!(account.to_string(), "alice@10.0.0.1::home/");
        assert_eq!(
            account.home_path(Path::new("/docs")),
            OsString::from("alice@10.0.0.1::home/docs")
        );
    }

    #[test]
    fn list_file_has_one_path_per_line() -> Result<()> {
        let list = write_list_file([Path::new("/a/b"), Path::new("/c")])?;
        assert_eq!(fs::read_to_string(list.path())?, "/a/b\n/c\n");
        Ok(())
    }
}
