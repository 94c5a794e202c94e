//! Append-only run log.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;

use crate::constants::VERSION_TIMESTAMP_FORMAT;
use crate::error::Result;

/// Append one `YYYYMMDD_HHMMSS,message` line to the log at `log_path`.
///
/// Creates the file and any missing parent directories; never truncates
/// existing lines.
pub fn log_event(message: &str, log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let stamp = Utc::now().format(VERSION_TIMESTAMP_FORMAT);
    writeln!(file, "{stamp},{message}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_without_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("logs").join("etl.log");

        log_event("pipeline started", &log_path).unwrap();
        log_event("pipeline finished", &log_path).unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(",pipeline started"));
        assert!(lines[1].ends_with(",pipeline finished"));
    }

    #[test]
    fn lines_carry_a_sortable_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("etl.log");
        log_event("hello", &log_path).unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        let (stamp, message) = content.trim_end().split_once(',').unwrap();
        assert_eq!(message, "hello");
        // 20250115_093042
        assert_eq!(stamp.len(), 15);
        assert_eq!(stamp.as_bytes()[8], b'_');
        assert!(stamp[..8].chars().all(|c| c.is_ascii_digit()));
    }
}
