//! Finished-task archive.
//!
//! Finished tasks are written once, at shutdown, as a pretty-printed JSON
//! array of `TaskRecord`s and read back at startup. Running and pending
//! tasks are never archived; they do not survive a restart.

use crate::task::{parse_timestamp, CaptureTask, TaskRecord, TaskStatus};
use crate::trace::TraceLocator;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to read task archive {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write task archive {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("task archive {path} is not a JSON array: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize task archive: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why one archived record could not be restored.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed task record: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("task record has an empty id")]
    EmptyId,

    #[error("task record '{id}' has status '{status}', only finished tasks are archived")]
    NotFinished { id: String, status: TaskStatus },

    #[error("task record '{id}' has no {field}")]
    MissingTime { id: String, field: &'static str },

    #[error("task record '{id}' has unparseable {field} '{value}': {source}")]
    BadTime {
        id: String,
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// JSON file of finished tasks.
#[derive(Debug, Clone)]
pub struct TaskArchive {
    path: PathBuf,
    locator: TraceLocator,
}

impl TaskArchive {
    /// `locator` turns trace paths into the URLs stored in records, and back.
    pub fn new(path: impl Into<PathBuf>, locator: TraceLocator) -> Self {
        Self {
            path: path.into(),
            locator,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn locator(&self) -> &TraceLocator {
        &self.locator
    }

    /// Load finished tasks, starting empty if the archive is missing or
    /// unreadable. Never fails.
    pub fn load(&self) -> Vec<CaptureTask> {
        if !self.path.exists() {
            warn!(
                archive.path = %self.path.display(),
                "No task archive found, starting with no finished tasks"
            );
            return Vec::new();
        }

        match self.try_load() {
            Ok(tasks) => {
                info!(
                    archive.path = %self.path.display(),
                    tasks = tasks.len(),
                    "Loaded finished tasks"
                );
                tasks
            }
            Err(e) => {
                warn!(
                    archive.path = %self.path.display(),
                    error = %e,
                    "Task archive unreadable, starting with no finished tasks"
                );
                Vec::new()
            }
        }
    }

    /// Load finished tasks. Individual bad records are skipped with a
    /// warning; only a missing, unreadable or non-array file is an error.
    pub fn try_load(&self) -> Result<Vec<CaptureTask>, ArchiveError> {
        let json = std::fs::read_to_string(&self.path).map_err(|source| ArchiveError::Read {
            path: self.path.clone(),
            source,
        })?;
        let values: Vec<serde_json::Value> =
            serde_json::from_str(&json).map_err(|source| ArchiveError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let mut tasks = Vec::with_capacity(values.len());
        for (idx, value) in values.into_iter().enumerate() {
            let decoded = serde_json::from_value::<TaskRecord>(value)
                .map_err(RecordError::Malformed)
                .and_then(|record| self.decode(record));
            match decoded {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    warn!(
                        archive.path = %self.path.display(),
                        record = idx,
                        error = %e,
                        "Skipping archived task record"
                    );
                }
            }
        }
        Ok(tasks)
    }

    /// Write `tasks` as the new archive contents, replacing the file
    /// atomically. Returns the number of records written.
    pub fn save(&self, tasks: &[CaptureTask]) -> Result<usize, ArchiveError> {
        let records: Vec<TaskRecord> = tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Finished)
            .map(|t| t.to_record(&self.locator))
            .collect();
        let json = serde_json::to_string_pretty(&records)?;

        let write_err = |source: std::io::Error| ArchiveError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        // Atomic write: write to temp, then rename
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, json).map_err(write_err)?;
        std::fs::rename(&temp_path, &self.path).map_err(write_err)?;

        info!(
            archive.path = %self.path.display(),
            tasks = records.len(),
            "Saved finished tasks"
        );
        Ok(records.len())
    }

    /// Rebuild a finished task from its archived record.
    pub fn decode(&self, record: TaskRecord) -> Result<CaptureTask, RecordError> {
        if record.id.is_empty() {
            return Err(RecordError::EmptyId);
        }
        if record.status != TaskStatus::Finished {
            return Err(RecordError::NotFinished {
                id: record.id,
                status: record.status,
            });
        }

        let start_time = required_time(&record.id, "start_time", &record.start_time)?;
        let stop_time = required_time(&record.id, "stop_time", &record.stop_time)?;
        let traces = record
            .trace_list
            .iter()
            .map(|url| self.locator.path_for(url))
            .collect();

        Ok(CaptureTask::finished(
            record.id,
            record.owner,
            record.host,
            start_time,
            stop_time,
            traces,
        ))
    }
}

fn required_time(
    id: &str,
    field: &'static str,
    value: &str,
) -> Result<chrono::DateTime<chrono::Utc>, RecordError> {
    match parse_timestamp(value) {
        Ok(Some(time)) => Ok(time),
        Ok(None) => Err(RecordError::MissingTime {
            id: id.to_string(),
            field,
        }),
        Err(source) => Err(RecordError::BadTime {
            id: id.to_string(),
            field,
            value: value.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn archive(dir: &TempDir) -> TaskArchive {
        TaskArchive::new(
            dir.path().join("tasks.json"),
            TraceLocator::new("ftp://10.1.1.1/", "/srv/traces"),
        )
    }

    fn record(id: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "start_time": "03/14/26 09:00:00",
            "stop_time": "03/14/26 09:05:00",
            "owner": "alice",
            "host": "bench-1",
            "trace_list": ["ftp://10.1.1.1/cap-1.btt"],
            "status": status,
        })
    }

    #[test]
    fn test_missing_archive_loads_empty() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir);
        assert!(archive.load().is_empty());
        assert!(matches!(archive.try_load(), Err(ArchiveError::Read { .. })));
    }

    #[test]
    fn test_garbage_archive_loads_empty() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir);
        std::fs::write(archive.path(), "{ not json").unwrap();
        assert!(archive.load().is_empty());
        assert!(matches!(archive.try_load(), Err(ArchiveError::Parse { .. })));
    }

    #[test]
    fn test_bad_records_are_skipped() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir);
        let mut no_stop = record("t3", "Finished");
        no_stop["stop_time"] = serde_json::json!("");
        let doc = serde_json::json!([
            record("t0", "Finished"),
            record("t1", "Running"),
            {"id": "t2"},
            no_stop,
            record("", "Finished"),
        ]);
        std::fs::write(archive.path(), doc.to_string()).unwrap();

        let tasks = archive.load();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id(), "t0");
        assert_eq!(tasks[0].traces(), ["/srv/traces/cap-1.btt".to_string()]);
    }

    #[test]
    fn test_decode_errors() {
        let dir = TempDir::new().unwrap();
        let archive = archive(&dir);

        let mut bad = serde_json::from_value::<TaskRecord>(record("t0", "Finished")).unwrap();
        bad.start_time = "14 March".to_string();
        assert!(matches!(
            archive.decode(bad),
            Err(RecordError::BadTime { field: "start_time", .. })
        ));

        let pending = serde_json::from_value::<TaskRecord>(record("t0", "Pending")).unwrap();
        assert!(matches!(
            archive.decode(pending),
            Err(RecordError::NotFinished { status: TaskStatus::Pending, .. })
        ));
    }

    #[test]
    fn test_save_writes_only_finished_tasks() {
        let dir = TempDir::new().unwrap();
        let archive = TaskArchive::new(
            dir.path().join("nested/state/tasks.json"),
            TraceLocator::default(),
        );
        let start = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let done = CaptureTask::finished("t0", "alice", "h", start, start, vec![]);
        let running = CaptureTask::new("t1", "bob", "h");

        assert_eq!(archive.save(&[done, running]).unwrap(), 1);
        assert!(!archive.path().with_extension("tmp").exists());
        let tasks = archive.try_load().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id(), "t0");
    }

    #[test]
    fn test_save_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        // A directory where the archive file should be.
        let path = dir.path().join("tasks.json");
        std::fs::create_dir_all(path.join("blocker")).unwrap();
        let archive = TaskArchive::new(&path, TraceLocator::default());

        assert!(matches!(archive.save(&[]), Err(ArchiveError::Write { .. })));
    }
}
