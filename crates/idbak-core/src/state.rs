//! Persisted last-run marker.
//!
//! The marker file holds a single floating point number: seconds since the
//! Unix epoch at which the last run was started.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use eyre::{eyre, Context, Result};

/// Read the marker; a missing file means no run happened yet.
pub fn read_last_run(path: &Path) -> Result<Option<DateTime<Local>>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };

    let seconds: f64 = contents
        .trim()
        .parse()
        .with_context(|| format!("malformed last run marker {}", path.display()))?;
    from_epoch_seconds(seconds).map(Some)
}

/// Replace the marker with `now`.
pub fn write_last_run(path: &Path, now: &DateTime<Local>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, epoch_seconds(now).to_string())
        .with_context(|| format!("failed to write {}", path.display()))
}

/// A run is due when none happened yet or `interval` has elapsed since.
pub fn is_due(
    last_run: Option<&DateTime<Local>>,
    interval: Duration,
    now: &DateTime<Local>,
) -> bool {
    let Some(last_run) = last_run else {
        return true;
    };
    match chrono::Duration::from_std(interval) {
        Ok(interval) => *last_run + interval <= *now,
        Err(_) => false,
    }
}

fn epoch_seconds(time: &DateTime<Local>) -> f64 {
    time.timestamp() as f64 + f64::from(time.timestamp_subsec_micros()) / 1_000_000.0
}

fn from_epoch_seconds(seconds: f64) -> Result<DateTime<Local>> {
    if !seconds.is_finite() {
        return Err(eyre!("last run marker is not a finite number: {seconds}"));
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0) as u32;
    Local
        .timestamp_opt(whole as i64, nanos.min(999_999_999))
        .single()
        .ok_or_else(|| eyre!("last run marker out of range: {seconds}"))
}
