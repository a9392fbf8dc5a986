//! End-of-run summary: `(total, completed, successful, failed, wall_time)`, read back from
//! the status-file directory rather than the in-memory attempt list, so a summary printed
//! after a crash-and-restart still reflects every attempt that ever ran.

use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub successful: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }

    pub fn log(&self, wall_time: Duration) {
        log::info!(
            "run summary: {}/{} completed, {} successful, {} failed, success rate {:.1}%, wall time {:.1}s",
            self.completed,
            self.total,
            self.successful,
            self.failed,
            self.success_rate() * 100.0,
            wall_time.as_secs_f64(),
        );
    }
}

/// Scans `{log_dir}/status_{execution_id}/*.txt` and tallies terminal states. `FINISHED`
/// is treated as success-equivalent, matching how the source's own readers interpret it
/// even though this repo's own session wrapper never writes it. `expected_total`
/// overrides the denominator when the dataset config supplies one.
pub fn summarize(log_dir: &Path, execution_id: &str, expected_total: Option<u32>) -> RunSummary {
    let status_dir = log_dir.join(format!("status_{execution_id}"));
    let mut seen = 0usize;
    let mut completed = 0usize;
    let mut successful = 0usize;
    let mut failed = 0usize;

    if let Ok(entries) = std::fs::read_dir(&status_dir) {
        for entry in entries.flatten() {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            seen += 1;
            let status = std::fs::read_to_string(entry.path()).unwrap_or_default();
            match status.trim() {
                "COMPLETED_SUCCESS" | "FINISHED" => {
                    completed += 1;
                    successful += 1;
                }
                "COMPLETED_FAILED" => {
                    completed += 1;
                    failed += 1;
                }
                _ => {}
            }
        }
    }

    let total = expected_total.map(|e| e as usize).unwrap_or(seen);
    RunSummary {
        total,
        completed,
        successful,
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_status(dir: &Path, name: &str, value: &str) {
        std::fs::write(dir.join(name), value).unwrap();
    }

    #[test]
    fn tallies_status_files_by_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let status_dir = dir.path().join("status_host-1");
        std::fs::create_dir_all(&status_dir).unwrap();
        write_status(&status_dir, "1_pwn_foo_try1.txt", "COMPLETED_SUCCESS");
        write_status(&status_dir, "2_web_bar_try1.txt", "COMPLETED_FAILED");
        write_status(&status_dir, "3_rev_baz_try1.txt", "RUNNING");

        let summary = summarize(dir.path(), "host-1", None);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn finished_status_counts_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let status_dir = dir.path().join("status_host-1");
        std::fs::create_dir_all(&status_dir).unwrap();
        write_status(&status_dir, "1_pwn_foo_try1.txt", "FINISHED");

        let summary = summarize(dir.path(), "host-1", None);
        assert_eq!(summary.successful, 1);
    }

    #[test]
    fn expected_total_overrides_denominator() {
        let dir = tempfile::tempdir().unwrap();
        let status_dir = dir.path().join("status_host-1");
        std::fs::create_dir_all(&status_dir).unwrap();
        write_status(&status_dir, "1_pwn_foo_try1.txt", "COMPLETED_SUCCESS");

        let summary = summarize(dir.path(), "host-1", Some(91));
        assert_eq!(summary.total, 91);
        assert_eq!(summary.successful, 1);
    }

    #[test]
    fn missing_status_dir_yields_empty_summary() {
        let dir = tempfile::tempdir().unwrap();
        let summary = summarize(dir.path(), "host-1", None);
        assert_eq!(summary, RunSummary { total: 0, completed: 0, successful: 0, failed: 0 });
    }
}
