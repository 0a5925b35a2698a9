//! Run log sinks.
//!
//! Every backup run gets one [`Logger`]. The file-backed implementation
//! writes the detailed per-run log; console output goes through the `log`
//! facade.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use eyre::{Context, Result};
use parking_lot::Mutex;

/// Why the walker did not emit a path.
#[derive(Debug)]
pub enum SkipReason {
    /// The path could not be canonicalized.
    BrokenLink(io::Error),
    /// The path equals or lies below an exclude.
    Excluded(PathBuf),
    /// The directory disappeared before it could be listed.
    Vanished(io::Error),
    /// An entry of a listed directory could not be read.
    UnreadableEntry(io::Error),
    /// Sockets, fifos, devices and entries that cannot be stat'ed.
    NotFileOrDirectory,
    /// The canonical path was already expanded or emitted in this walk.
    AlreadyVisited,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BrokenLink(err) => {
                write!(f, "it appears to be a broken symbolic link: {err}")
            }
            SkipReason::Excluded(exclude) => write!(f, "due to exclude {}", exclude.display()),
            SkipReason::Vanished(err) => {
                write!(f, "it was removed while the backup was running: {err}")
            }
            SkipReason::UnreadableEntry(err) => {
                write!(f, "one of its entries could not be read: {err}")
            }
            SkipReason::NotFileOrDirectory => f.write_str("it is neither a file nor a directory"),
            SkipReason::AlreadyVisited => f.write_str("it was already visited"),
        }
    }
}

pub trait Logger {
    /// Free-form progress line.
    fn note(&self, message: &str);
    fn skipped(&self, path: &Path, reason: &SkipReason);
    /// A file was uploaded; `size` and `unit` are already scaled.
    fn transferred(&self, file_name: &str, size: f64, unit: &str, rate: &str);
    /// The utility reported an outcome other than success or in-sync.
    fn failed(&self, record: &str);
}

/// Discards everything.
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn note(&self, _message: &str) {}
    fn skipped(&self, _path: &Path, _reason: &SkipReason) {}
    fn transferred(&self, _file_name: &str, _size: f64, _unit: &str, _rate: &str) {}
    fn failed(&self, _record: &str) {}
}

fn skipped_line(path: &Path, reason: &SkipReason) -> String {
    match reason {
        SkipReason::Excluded(_) => format!("Skipping path {} {reason}", path.display()),
        _ => format!("Skipping path {} as {reason}", path.display()),
    }
}

fn transferred_line(file_name: &str, size: f64, unit: &str, rate: &str) -> String {
    format!("Transferred {size:.1} {unit} at {rate} to backup file /{file_name}")
}

fn failed_line(record: &str) -> String {
    format!("Failed to backup file: {record}")
}

/// Append-only log file for a single run.
pub struct FileLogger {
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
}

impl FileLogger {
    /// Create `<dir>/<start>.log`, creating `dir` if needed.
    pub fn create(dir: &Path, start: &DateTime<Local>) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        let path = dir.join(format!("{}.log", start.format("%Y-%m-%dT%H:%M:%S")));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open run log {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(LineWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, line: &str) {
        let mut writer = self.writer.lock();
        if let Err(err) = writeln!(writer, "{line}") {
            log::warn!("failed to write run log {}: {err}", self.path.display());
        }
    }
}

impl Logger for FileLogger {
    fn note(&self, message: &str) {
        log::info!("{message}");
        self.write_line(message);
    }

    fn skipped(&self, path: &Path, reason: &SkipReason) {
        let line = skipped_line(path, reason);
        log::debug!("{line}");
        self.write_line(&line);
    }

    fn transferred(&self, file_name: &str, size: f64, unit: &str, rate: &str) {
        let line = transferred_line(file_name, size, unit, rate);
        log::debug!("{line}");
        self.write_line(&line);
    }

    fn failed(&self, record: &str) {
        let line = failed_line(record);
        log::warn!("{line}");
        self.write_line(&line);
    }
}

/// Keeps rendered lines in memory.
#[derive(Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn note(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }

    fn skipped(&self, path: &Path, reason: &SkipReason) {
        self.lines.lock().push(skipped_line(path, reason));
    }

    fn transferred(&self, file_name: &str, size: f64, unit: &str, rate: &str) {
        self.lines
            .lock()
            .push(transferred_line(file_name, size, unit, rate));
    }

    fn failed(&self, record: &str) {
        self.lines.lock().push(failed_line(record));
    }
}
