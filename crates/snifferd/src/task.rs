//! Capture tasks and their client-facing representation.

use crate::trace::{TraceLocator, TraceSegment};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `%x %X` with the C locale spelled out, so parsing does not depend on it.
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%y %H:%M:%S";

/// Lifecycle position of a task, derived from its timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    Running,
    Pending,
    Finished,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "Not Started",
            TaskStatus::Running => "Running",
            TaskStatus::Pending => "Pending",
            TaskStatus::Finished => "Finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Not Started" => Some(TaskStatus::NotStarted),
            "Running" => Some(TaskStatus::Running),
            "Pending" => Some(TaskStatus::Pending),
            "Finished" => Some(TaskStatus::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client's capture request, independent of device file boundaries.
///
/// Only the registry creates and stops tasks; the capture worker only
/// appends traces and clears `more_expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTask {
    id: String,
    owner: String,
    host: String,
    start_time: Option<DateTime<Utc>>,
    stop_time: Option<DateTime<Utc>>,
    /// Saved trace paths, in segment order.
    traces: Vec<String>,
    more_expected: bool,
}

impl CaptureTask {
    pub fn new(id: impl Into<String>, owner: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            host: host.into(),
            start_time: None,
            stop_time: None,
            traces: Vec::new(),
            more_expected: true,
        }
    }

    /// Rebuild a task that finished in an earlier run.
    pub fn finished(
        id: impl Into<String>,
        owner: impl Into<String>,
        host: impl Into<String>,
        start_time: DateTime<Utc>,
        stop_time: DateTime<Utc>,
        traces: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            host: host.into(),
            start_time: Some(start_time),
            stop_time: Some(stop_time),
            traces,
            more_expected: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.stop_time
    }

    pub fn traces(&self) -> &[String] {
        &self.traces
    }

    pub fn more_expected(&self) -> bool {
        self.more_expected
    }

    pub fn status(&self) -> TaskStatus {
        match (self.start_time, self.stop_time) {
            (None, _) => TaskStatus::NotStarted,
            (Some(_), None) => TaskStatus::Running,
            (Some(_), Some(_)) if self.more_expected => TaskStatus::Pending,
            (Some(_), Some(_)) => TaskStatus::Finished,
        }
    }

    pub(crate) fn start(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.status(), TaskStatus::NotStarted);
        self.start_time = Some(now);
    }

    pub(crate) fn stop(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.status(), TaskStatus::Running);
        self.stop_time = Some(now);
    }

    /// Record a segment that covered part of this task. Segments the device
    /// failed to save leave no trace entry.
    pub(crate) fn attach(&mut self, segment: &TraceSegment) {
        debug_assert_ne!(self.status(), TaskStatus::Finished);
        if segment.is_saved() {
            self.traces.push(segment.path.clone());
        }
    }

    pub(crate) fn finalize(&mut self) {
        debug_assert_eq!(self.status(), TaskStatus::Pending);
        self.more_expected = false;
    }

    pub fn to_record(&self, locator: &TraceLocator) -> TaskRecord {
        TaskRecord {
            id: self.id.clone(),
            start_time: format_timestamp(self.start_time),
            stop_time: format_timestamp(self.stop_time),
            owner: self.owner.clone(),
            host: self.host.clone(),
            trace_list: self.traces.iter().map(|p| locator.url_for(p)).collect(),
            status: self.status(),
        }
    }
}

/// How a task is shown to clients and written to the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    /// `TIMESTAMP_FORMAT`, UTC; empty when unset.
    pub start_time: String,
    pub stop_time: String,
    pub owner: String,
    pub host: String,
    /// Download URLs of the task's traces.
    pub trace_list: Vec<String>,
    pub status: TaskStatus,
}

pub fn format_timestamp(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

/// Parse a `TIMESTAMP_FORMAT` string; empty means unset.
pub fn parse_timestamp(s: &str) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    if s.is_empty() {
        return Ok(None);
    }
    let naive = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)?;
    Ok(Some(naive.and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_progression() {
        let now = Utc::now();
        let mut task = CaptureTask::new("t0", "alice", "bench-3");
        assert_eq!(task.status(), TaskStatus::NotStarted);

        task.start(now);
        assert_eq!(task.status(), TaskStatus::Running);

        task.stop(now);
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.more_expected());

        task.finalize();
        assert_eq!(task.status(), TaskStatus::Finished);
    }

    #[test]
    fn test_failed_segment_leaves_no_trace() {
        let now = Utc::now();
        let mut task = CaptureTask::new("t0", "alice", "bench-3");
        task.start(now);
        task.attach(&TraceSegment::new(now, now, ""));
        task.attach(&TraceSegment::new(now, now, "/t/a.btt"));
        assert_eq!(task.traces(), ["/t/a.btt".to_string()]);
    }

    #[test]
    fn test_status_strings() {
        for status in [
            TaskStatus::NotStarted,
            TaskStatus::Running,
            TaskStatus::Pending,
            TaskStatus::Finished,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, serde_json::json!(status.as_str()));
        }
        assert_eq!(TaskStatus::parse("finished"), None);
    }

    #[test]
    fn test_timestamp_format() {
        let t = Utc.with_ymd_and_hms(2026, 10, 19, 14, 3, 9).unwrap();
        assert_eq!(format_timestamp(Some(t)), "10/19/26 14:03:09");
        assert_eq!(parse_timestamp("10/19/26 14:03:09").unwrap(), Some(t));
        assert_eq!(format_timestamp(None), "");
        assert_eq!(parse_timestamp("").unwrap(), None);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_record_uses_locator() {
        let start = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let task = CaptureTask::finished(
            "t9",
            "bob",
            "rig-1",
            start,
            start + chrono::Duration::seconds(30),
            vec!["/srv/traces/cap-a.btt".to_string()],
        );
        let locator = TraceLocator::new("ftp://10.0.0.5/", "/srv/traces");
        let record = task.to_record(&locator);

        assert_eq!(record.status, TaskStatus::Finished);
        assert_eq!(record.start_time, "01/02/26 03:04:05");
        assert_eq!(record.stop_time, "01/02/26 03:04:35");
        assert_eq!(record.trace_list, vec!["ftp://10.0.0.5/cap-a.btt"]);
    }
}
