//! Pruning of the daily log files written by [`super::init_logging`].
//!
//! The appender names files `taskpaper.YYYY-MM-DD.log`. On startup files
//! older than [`MAX_LOG_AGE_DAYS`] days, or beyond the newest
//! [`MAX_LOG_FILES`], are removed (oldest first).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum age (in days) of log files to keep.
pub const MAX_LOG_AGE_DAYS: u64 = 14;

/// Maximum number of log files to keep.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix shared by every log file.
pub const LOG_FILE_PREFIX: &str = "taskpaper";

/// File name suffix shared by every log file.
pub const LOG_FILE_SUFFIX: &str = "log";

/// Remove old log files from `log_dir`. Returns how many were deleted.
pub fn prune_old_logs(log_dir: &Path) -> usize {
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(MAX_LOG_AGE_DAYS * 86_400))
        .unwrap_or(UNIX_EPOCH);
    prune_old_logs_with_cutoff(log_dir, cutoff, MAX_LOG_FILES)
}

fn is_log_file(name: &str) -> bool {
    name.starts_with(&format!("{LOG_FILE_PREFIX}."))
        && name.ends_with(&format!(".{LOG_FILE_SUFFIX}"))
}

/// Inner prune implementation with injectable cutoff for testing.
fn prune_old_logs_with_cutoff(log_dir: &Path, cutoff: SystemTime, max_files: usize) -> usize {
    let mut entries: Vec<(PathBuf, SystemTime)> = match fs::read_dir(log_dir) {
        Ok(dir) => dir
            .flatten()
            .filter_map(|e| {
                let path = e.path();
                if !is_log_file(path.file_name()?.to_str()?) {
                    return None;
                }
                let mtime = path.metadata().ok()?.modified().ok()?;
                Some((path, mtime))
            })
            .collect(),
        Err(_) => return 0,
    };

    // Newest first; ties broken by name so dated names order the same way.
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = 0;
    for (i, (path, mtime)) in entries.iter().enumerate() {
        if (*mtime < cutoff || i >= max_files) && fs::remove_file(path).is_ok() {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn log_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| is_log_file(n))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn recognises_appender_file_names() {
        assert!(is_log_file("taskpaper.2026-10-17.log"));
        assert!(!is_log_file("taskpaper.toml"));
        assert!(!is_log_file("other.2026-10-17.log"));
    }

    #[test]
    fn prune_keeps_newest_files_over_limit() {
        let tmp = tempfile::tempdir().unwrap();
        for day in 1..=(MAX_LOG_FILES + 3) {
            let name = format!("taskpaper.2026-01-{day:02}.log");
            fs::write(tmp.path().join(name), "line").unwrap();
        }
        fs::write(tmp.path().join("notes.txt"), "keep").unwrap();

        let removed = prune_old_logs(tmp.path());

        assert_eq!(removed, 3);
        let remaining = log_files(tmp.path());
        assert_eq!(remaining.len(), MAX_LOG_FILES);
        assert!(!remaining.contains(&"taskpaper.2026-01-01.log".to_owned()));
        assert!(tmp.path().join("notes.txt").exists());
    }

    #[test]
    fn prune_removes_files_older_than_cutoff() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("taskpaper.2026-01-01.log");
        let b = tmp.path().join("taskpaper.2026-01-02.log");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        let future_cutoff = SystemTime::now() + Duration::from_secs(3600);
        let removed = prune_old_logs_with_cutoff(tmp.path(), future_cutoff, MAX_LOG_FILES);

        assert_eq!(removed, 2);
        assert!(!a.exists() && !b.exists());
    }

    #[test]
    fn missing_directory_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(prune_old_logs(&tmp.path().join("absent")), 0);
    }
}
