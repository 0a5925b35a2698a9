use directories::{BaseDirs, ProjectDirs};
use eyre::{bail, eyre, Context, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on the number of paths handed to the utility in one call.
pub const MAX_BATCH_SIZE: usize = 1000;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
const DEFAULT_NOTIFY_URL: &str = "https://webdav.ibackup.com/cgi-bin/Notify_email_ibl";
const UTIL_FILE_NAME: &str = "idevsutil_dedup";

static CONFIG_DIR_OVERRIDE: Lazy<RwLock<Option<PathBuf>>> = Lazy::new(|| RwLock::new(None));

/// Override the configuration directory for the current process.
/// Subsequent calls replace the previous override.
pub fn set_config_dir<P: AsRef<Path>>(path: P) {
    *CONFIG_DIR_OVERRIDE.write() = Some(path.as_ref().to_path_buf());
}

/// Resolve the configuration directory.
/// Priority: explicit override -> platform standard -> ~/.config/idbak
pub fn config_dir() -> Result<PathBuf> {
    if let Some(path) = CONFIG_DIR_OVERRIDE.read().clone() {
        return Ok(path);
    }

    if let Some(proj) = ProjectDirs::from("com", "idbak", "idbak") {
        return Ok(proj.config_dir().to_path_buf());
    }

    if let Some(base) = BaseDirs::new() {
        return Ok(base.home_dir().join(".config").join("idbak"));
    }

    Err(eyre!(
        "unable to determine configuration directory for idbak (no override and no platform default)"
    ))
}

/// Default location of the agent configuration file.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// A credential that must never show up in logs or debug output.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    username: String,
    password: Secret,
    encryption_key: Secret,
    device_name: String,
    notify_email: String,
    #[serde(default)]
    includes: Vec<PathBuf>,
    #[serde(default)]
    excludes: Vec<PathBuf>,
    /// Seconds between two backup runs.
    interval: u64,
    util_path: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    poll_interval: Option<u64>,
    #[serde(default)]
    startup_delay: u64,
    notify_url: Option<String>,
    batch_size: Option<usize>,
}

/// Agent configuration, loaded once per process.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub username: String,
    pub password: Secret,
    pub encryption_key: Secret,
    pub device_name: String,
    pub notify_email: String,
    pub includes: Vec<PathBuf>,
    pub excludes: Vec<PathBuf>,
    pub interval: Duration,
    pub util_path: PathBuf,
    pub state_dir: PathBuf,
    pub poll_interval: Duration,
    pub startup_delay: Duration,
    pub notify_url: String,
    pub batch_size: usize,
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let base = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => config_dir()?,
        };
        Self::from_toml(&contents, &base)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Parse a TOML document. Relative defaults (utility binary, state
    /// directory) are resolved against `base`.
    pub fn from_toml(contents: &str, base: &Path) -> Result<Self> {
        let raw = toml::from_str::<RawConfig>(contents)?;

        if raw.username.trim().is_empty() {
            bail!("username cannot be empty");
        }
        if raw.device_name.trim().is_empty() {
            bail!("device_name cannot be empty");
        }
        if raw.includes.is_empty() {
            bail!("at least one include path is required");
        }
        if raw.interval == 0 {
            bail!("interval must be greater than zero seconds");
        }
        let batch_size = raw.batch_size.unwrap_or(MAX_BATCH_SIZE);
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            bail!("batch_size must be between 1 and {MAX_BATCH_SIZE}, got {batch_size}");
        }

        Ok(Self {
            username: raw.username,
            password: raw.password,
            encryption_key: raw.encryption_key,
            device_name: raw.device_name,
            notify_email: raw.notify_email,
            includes: raw.includes,
            excludes: raw.excludes,
            interval: Duration::from_secs(raw.interval),
            util_path: raw.util_path.unwrap_or_else(|| base.join(UTIL_FILE_NAME)),
            state_dir: raw.state_dir.unwrap_or_else(|| base.to_path_buf()),
            poll_interval: Duration::from_secs(
                raw.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            startup_delay: Duration::from_secs(raw.startup_delay),
            notify_url: raw
                .notify_url
                .unwrap_or_else(|| DEFAULT_NOTIFY_URL.to_string()),
            batch_size,
        })
    }

    pub fn last_run_path(&self) -> PathBuf {
        self.state_dir.join("lastrun")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }
}
