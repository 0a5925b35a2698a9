use chrono::{DateTime, Local};

use crate::stats::RunStats;
use crate::util::Quota;

/// Summary of a finished backup run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub device_name: String,
    pub hostname: String,
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub stats: RunStats,
    pub quota: Quota,
}

impl RunReport {
    /// Mail subject; names the failure count when anything failed.
    pub fn subject(&self) -> String {
        if self.stats.is_complete() {
            "Successful backup summary".to_string()
        } else {
            format!(
                "Incomplete backup summary ({} out of {})",
                self.stats.failed, self.stats.considered
            )
        }
    }

    /// One line for the end of the run log.
    pub fn outcome_line(&self) -> String {
        if self.stats.is_complete() {
            format!(
                "Finished successful backup of {} files at {}.",
                self.stats.backed_up_now,
                self.end.format("%c")
            )
        } else {
            format!(
                "Finished incomplete backup of {} files with {} files missing at {}.",
                self.stats.backed_up_now,
                self.stats.failed,
                self.end.format("%c")
            )
        }
    }

    pub fn summary(&self) -> String {
        format!(
            r#"
Summary:
Machine: {device_name} ({hostname})
Backup start time: {start}
Backup end time: {end}
Files considered for backup: {considered}
Files backed up now: {backed_up_now}
Files already present in your account: {already_present}
Files failed to backup: {failed}
Quota used: {quota_used} GB out of {quota_total} GB"#,
            device_name = self.device_name,
            hostname = self.hostname,
            start = self.start.format("%c"),
            end = self.end.format("%c"),
            considered = self.stats.considered,
            backed_up_now = self.stats.backed_up_now,
            already_present = self.stats.already_present,
            failed = self.stats.failed,
            quota_used = self.quota.used_gib(),
            quota_total = self.quota.total_gib(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(stats: RunStats) -> RunReport {
        let start = Local
            .with_ymd_and_hms(2024, 1, 2, 3, 0, 0)
            .single()
            .expect("start");
        let end = Local
            .with_ymd_and_hms(2024, 1, 2, 3, 30, 0)
            .single()
            .expect("end");
        RunReport {
            device_name: "laptop".to_string(),
            hostname: "box".to_string(),
            start,
            end,
            stats,
            quota: Quota {
                used: 5 << 30,
                total: (100 << 30) + 12345,
            },
        }
    }

    #[test]
    fn successful_subject() {
        let stats = RunStats {
            considered: 3,
            backed_up_now: 1,
            already_present: 2,
            failed: 0,
        };
        assert_eq!(report(stats).subject(), "Successful backup summary");
    }

    #[test]
    fn incomplete_subject_names_counts() {
        let stats = RunStats {
            considered: 10,
            backed_up_now: 7,
            already_present: 1,
            failed: 2,
        };
        let report = report(stats);
        assert_eq!(report.subject(), "Incomplete backup summary (2 out of 10)");
        assert!(report.outcome_line().contains("with 2 files missing"));
    }

    #[test]
    fn summary_lists_counters_and_quota_in_gib() {
        let stats = RunStats {
            considered: 4,
            backed_up_now: 3,
            already_present: 1,
            failed: 0,
        };
        let summary = report(stats).summary();
        assert!(summary.contains("Machine: laptop (box)"));
        assert!(summary.contains("Files considered for backup: 4\n"));
        assert!(summary.contains("Files backed up now: 3\n"));
        assert!(summary.contains("Files already present in your account: 1\n"));
        assert!(summary.contains("Files failed to backup: 0\n"));
        assert!(summary.ends_with("Quota used: 5 GB out of 100 GB"));
    }
}
