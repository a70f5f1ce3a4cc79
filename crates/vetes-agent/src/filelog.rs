//! Per-task log files.
//!
//! Each task gets `<outputDir>/<taskId>/app.log`. The same file is written
//! by the staging containers (the log claim is mounted into their pods), so
//! writes always append and never truncate; rotation would clobber stager
//! lines. The file's content becomes the system-log blob of the final task
//! update.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

/// Appends timestamped lines to one task's log file.
///
/// Write failures are swallowed after a tracing warning: task logging must
/// never fail a reconciliation.
pub struct TaskLogger {
    path: PathBuf,
}

const TASK_LOG_FILE_NAME: &str = "app.log";

impl TaskLogger {
    /// Creates a logger for `<output_dir>/<task_id>/app.log`.
    #[must_use]
    pub fn new(output_dir: &Path, task_id: &str) -> Self {
        Self {
            path: output_dir.join(task_id).join(TASK_LOG_FILE_NAME),
        }
    }

    /// Appends an INFO line.
    pub fn info(&self, message: &str) {
        self.append("INFO", message);
    }

    /// Appends a WARN line.
    pub fn warn(&self, message: &str) {
        self.append("WARN", message);
    }

    /// Appends an ERROR line.
    pub fn error(&self, message: &str) {
        self.append("ERROR", message);
    }

    /// Reads the whole file back; `None` if it was never written.
    #[must_use]
    pub fn content(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Some(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "failed to read task log");
                None
            }
        }
    }

    fn append(&self, level: &str, message: &str) {
        if let Err(err) = self.try_append(level, message) {
            tracing::warn!(path = %self.path.display(), %err, "failed to write task log");
        }
    }

    fn try_append(&self, level: &str, message: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        writeln!(file, "{stamp}\t{level}\t{message}")
    }
}

/// Removes a task's whole log directory. Best-effort.
pub fn remove_task_log_dir(output_dir: &Path, task_id: &str) {
    let dir = output_dir.join(task_id);
    if let Err(err) = std::fs::remove_dir_all(&dir) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %dir.display(), %err, "failed to remove task log dir");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TaskLogger::new(dir.path(), "task-1");
        assert!(logger.content().is_none());

        logger.info("created job task-1-ex-00");
        logger.error("executor job task-1-ex-00 failed");

        let content = logger.content().unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].contains("created job task-1-ex-00"));
        assert!(lines[1].contains("ERROR"));
    }

    #[test]
    fn append_preserves_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("task-1")).unwrap();
        std::fs::write(dir.path().join("task-1/app.log"), "stager line\n").unwrap();

        let logger = TaskLogger::new(dir.path(), "task-1");
        logger.info("agent line");

        let content = logger.content().unwrap();
        assert!(content.starts_with("stager line\n"));
        assert!(content.contains("agent line"));
    }

    #[test]
    fn remove_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TaskLogger::new(dir.path(), "task-1");
        logger.info("hello");
        remove_task_log_dir(dir.path(), "task-1");
        assert!(!dir.path().join("task-1").exists());
        remove_task_log_dir(dir.path(), "task-1");
    }
}
