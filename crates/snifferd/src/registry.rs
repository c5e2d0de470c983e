//! Task lifecycle registry.
//!
//! Tasks live in exactly one of three partitions. Clients move tasks from
//! running to pending; the capture worker moves them from pending to
//! finished by attaching the segment that closed over their stop time.

use crate::error::CaptureError;
use crate::task::CaptureTask;
use crate::trace::TraceSegment;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info, warn};

/// What the device was doing when a segment was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEvent {
    Split,
    Stop,
    /// Final stop while the service shuts down.
    Shutdown,
}

impl fmt::Display for SegmentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SegmentEvent::Split => "split",
            SegmentEvent::Stop => "stop",
            SegmentEvent::Shutdown => "shutdown",
        })
    }
}

/// Result of fanning one segment out to the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachOutcome {
    /// Running tasks that received the segment.
    pub attached_running: usize,
    /// Pending tasks finished by the segment, in the order they were stopped.
    pub finalized: Vec<String>,
}

/// Task ids by partition at the moment a segment ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentCohort {
    running: Vec<String>,
    pending: Vec<String>,
}

impl SegmentCohort {
    fn was_running(&self, id: &str) -> bool {
        self.running.iter().any(|r| r == id)
    }

    fn was_pending(&self, id: &str) -> bool {
        self.pending.iter().any(|p| p == id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub running: usize,
    pub pending: usize,
    pub finished: usize,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    /// In start order.
    running: Vec<CaptureTask>,
    /// In stop order.
    pending: Vec<CaptureTask>,
    /// In finish order.
    finished: Vec<CaptureTask>,
    finished_index: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the finished partition with tasks from an earlier run.
    /// Repeated ids after the first are dropped.
    pub fn with_finished(tasks: Vec<CaptureTask>) -> Self {
        let mut registry = Self::new();
        for task in tasks {
            if registry.finished_index.contains_key(task.id()) {
                warn!(task.id = %task.id(), "Dropping duplicate finished task");
                continue;
            }
            registry.push_finished(task);
        }
        registry
    }

    pub fn contains(&self, id: &str) -> bool {
        self.finished_index.contains_key(id)
            || self.running.iter().any(|t| t.id() == id)
            || self.pending.iter().any(|t| t.id() == id)
    }

    pub fn start_new_task(
        &mut self,
        id: &str,
        owner: &str,
        host: &str,
        now: DateTime<Utc>,
    ) -> Result<CaptureTask, CaptureError> {
        if self.contains(id) {
            return Err(CaptureError::DuplicateTask(id.to_string()));
        }

        let mut task = CaptureTask::new(id, owner, host);
        task.start(now);
        self.running.push(task.clone());

        info!(
            task.id = %id,
            task.owner = %owner,
            task.host = %host,
            running = self.running.len(),
            "Capture task started"
        );

        Ok(task)
    }

    /// Stop a running task. Its final segment is attached later, when the
    /// worker next splits or stops the device.
    pub fn stop_task(&mut self, id: &str, now: DateTime<Utc>) -> Result<CaptureTask, CaptureError> {
        if !self.running.iter().any(|t| t.id() == id) {
            if self.contains(id) {
                return Err(CaptureError::TaskAlreadyStopped(id.to_string()));
            }
            return Err(CaptureError::TaskNotFound(id.to_string()));
        }

        let mut task = self.take_running(id)?;
        task.stop(now);
        self.pending.push(task.clone());

        info!(
            task.id = %id,
            running = self.running.len(),
            pending = self.pending.len(),
            "Capture task stopped"
        );

        Ok(task)
    }

    /// Stop every running task, in start order. Used when shutting down.
    pub fn stop_all_running(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let stopped: Vec<String> = self.running.iter().map(|t| t.id().to_string()).collect();
        for mut task in self.running.drain(..) {
            task.stop(now);
            self.pending.push(task);
        }
        if !stopped.is_empty() {
            info!(count = stopped.len(), "Stopped all running capture tasks");
        }
        stopped
    }

    /// The tasks a segment closing now belongs to.
    ///
    /// Taken under the same lock hold as the segment's stop time, so tasks
    /// started or stopped while the device call is in flight are judged
    /// against the registry as it was when the segment ended.
    pub fn cohort(&self) -> SegmentCohort {
        SegmentCohort {
            running: self.running.iter().map(|t| t.id().to_string()).collect(),
            pending: self.pending.iter().map(|t| t.id().to_string()).collect(),
        }
    }

    /// Fan a freshly produced segment out to the tasks in `cohort`.
    ///
    /// Tasks that were running when the segment ended get it, including any
    /// stopped since; those stay pending until the next segment. Tasks that
    /// were already pending get it as their last segment and move to
    /// finished. Tasks started after the segment ended get nothing.
    pub fn attach_segment(
        &mut self,
        segment: &TraceSegment,
        cohort: &SegmentCohort,
        event: SegmentEvent,
    ) -> AttachOutcome {
        let mut attached_running = 0;
        for task in &mut self.running {
            if cohort.was_running(task.id()) {
                task.attach(segment);
                attached_running += 1;
            }
        }

        let mut finalized = Vec::new();
        for mut task in std::mem::take(&mut self.pending) {
            if cohort.was_pending(task.id()) {
                task.attach(segment);
                task.finalize();
                info!(
                    task.id = %task.id(),
                    task.traces = task.traces().len(),
                    "Capture task finished"
                );
                finalized.push(task.id().to_string());
                self.push_finished(task);
            } else {
                if cohort.was_running(task.id()) {
                    task.attach(segment);
                }
                self.pending.push(task);
            }
        }

        debug!(
            segment.path = %segment.path,
            segment.event = %event,
            attached_running,
            finalized = finalized.len(),
            "Segment attached"
        );

        AttachOutcome {
            attached_running,
            finalized,
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<CaptureTask> {
        if let Some(&idx) = self.finished_index.get(id) {
            return self.finished.get(idx).cloned();
        }
        self.running
            .iter()
            .chain(self.pending.iter())
            .find(|t| t.id() == id)
            .cloned()
    }

    pub fn list_running(&self) -> Vec<CaptureTask> {
        self.running.clone()
    }

    pub fn list_pending(&self) -> Vec<CaptureTask> {
        self.pending.clone()
    }

    pub fn list_finished(&self) -> Vec<CaptureTask> {
        self.finished.clone()
    }

    /// Borrow the finished partition, for persisting without a copy.
    pub fn finished(&self) -> &[CaptureTask] {
        &self.finished
    }

    pub fn has_running(&self) -> bool {
        !self.running.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            running: self.running.len(),
            pending: self.pending.len(),
            finished: self.finished.len(),
        }
    }

    fn take_running(&mut self, id: &str) -> Result<CaptureTask, CaptureError> {
        match self.running.iter().position(|t| t.id() == id) {
            Some(idx) => Ok(self.running.remove(idx)),
            None => {
                error!(task.id = %id, "Running task missing from running partition");
                Err(CaptureError::Invariant(format!(
                    "task '{id}' is not in the running partition"
                )))
            }
        }
    }

    fn push_finished(&mut self, task: CaptureTask) {
        self.finished_index
            .insert(task.id().to_string(), self.finished.len());
        self.finished.push(task);
    }
}
