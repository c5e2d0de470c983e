//! The capture worker.
//!
//! One dedicated thread owns every recording call to the device. Each tick
//! it compares the device with the registry: start recording when a task is
//! running, stop when none is, and split the recording once the split
//! interval has elapsed. Every split or stop produces a `TraceSegment`,
//! which is appended to the timeline and then fanned out to the registry
//! before the next tick.
//!
//! Segment times never run backwards: if the clock steps back, the next
//! segment is pinned to the end of the previous one.

use crate::clock::Clock;
use crate::device::{CaptureConfig, SnifferDevice};
use crate::registry::{SegmentEvent, TaskRegistry};
use crate::timeline::TraceTimeline;
use crate::trace::{TraceNamer, TraceSegment};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Recording state of the device as the worker last left it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    /// Recording into a segment that began at `since`.
    Capturing { since: DateTime<Utc> },
}

impl DeviceState {
    pub fn is_capturing(&self) -> bool {
        matches!(self, DeviceState::Capturing { .. })
    }
}

/// State shared between the worker and request callers.
///
/// Request callers take one lock at a time, copy what they need, and release
/// it. Only the worker holds two at once, taking the timeline before the
/// registry. The device lock belongs to the worker: it may be held for as
/// long as a device call takes, so request paths go through
/// `capture_config` instead.
pub(crate) struct Shared {
    registry: Mutex<TaskRegistry>,
    timeline: RwLock<TraceTimeline>,
    device: Mutex<Box<dyn SnifferDevice>>,
    /// Last configuration set or read back, served to callers.
    capture_config: RwLock<CaptureConfig>,
    /// Set by a caller, applied by the worker on its next tick.
    config_update: Mutex<Option<CaptureConfig>>,
    capturing: AtomicBool,
    pub(crate) shutting_down: AtomicBool,
}

impl Shared {
    pub(crate) fn new(registry: TaskRegistry, device: Box<dyn SnifferDevice>) -> Self {
        let capture_config = device.capture_config();
        Self {
            registry: Mutex::new(registry),
            timeline: RwLock::new(TraceTimeline::new()),
            device: Mutex::new(device),
            capture_config: RwLock::new(capture_config),
            config_update: Mutex::new(None),
            capturing: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, TaskRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn timeline(&self) -> RwLockReadGuard<'_, TraceTimeline> {
        self.timeline.read().unwrap_or_else(|e| e.into_inner())
    }

    fn timeline_mut(&self) -> RwLockWriteGuard<'_, TraceTimeline> {
        self.timeline.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn device(&self) -> MutexGuard<'_, Box<dyn SnifferDevice>> {
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    pub(crate) fn capture_config(&self) -> CaptureConfig {
        self.capture_config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Publish `config` at once and queue it for the device.
    pub(crate) fn queue_capture_config(&self, config: CaptureConfig) {
        let mut update = self.config_update.lock().unwrap_or_else(|e| e.into_inner());
        *self.capture_config.write().unwrap_or_else(|e| e.into_inner()) = config.clone();
        *update = Some(config);
    }

    fn take_config_update(&self) -> Option<CaptureConfig> {
        self.config_update
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

pub struct CaptureWorker {
    shared: Arc<Shared>,
    namer: Arc<dyn TraceNamer>,
    clock: Arc<dyn Clock>,
    /// `None` disables splitting.
    split_interval: Option<Duration>,
    state: DeviceState,
    failed_starts: u64,
    /// Stop time of the last segment produced.
    last_stop: Option<DateTime<Utc>>,
}

impl CaptureWorker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        namer: Arc<dyn TraceNamer>,
        clock: Arc<dyn Clock>,
        split_interval: Option<Duration>,
    ) -> Self {
        Self {
            shared,
            namer,
            clock,
            split_interval: split_interval.filter(|d| *d > Duration::zero()),
            state: DeviceState::Idle,
            failed_starts: 0,
            last_stop: None,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Tick every `poll` until `shutdown` fires or its sender goes away,
    /// then make the final stop and close the device.
    pub fn run(mut self, shutdown: Receiver<()>, poll: std::time::Duration) {
        info!(
            poll_ms = poll.as_millis() as u64,
            split_secs = ?self.split_interval.map(|d| d.num_seconds()),
            "Capture worker running"
        );
        loop {
            self.tick();
            match shutdown.recv_timeout(poll) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.finish();
    }

    /// Bring the device in line with the registry once.
    pub fn tick(&mut self) {
        self.apply_config_update();
        let has_running = self.shared.registry().has_running();

        match self.state {
            DeviceState::Idle if has_running => self.start(),
            DeviceState::Idle => {}
            DeviceState::Capturing { since } if !has_running => {
                self.close_segment(since, SegmentEvent::Stop);
                self.set_state(DeviceState::Idle);
            }
            DeviceState::Capturing { since } => {
                if self.split_due(since) {
                    let stop = self.close_segment(since, SegmentEvent::Split);
                    self.set_state(DeviceState::Capturing { since: stop });
                }
            }
        }
    }

    /// Final stop if still recording, then close the device.
    pub fn finish(&mut self) {
        self.apply_config_update();
        if let DeviceState::Capturing { since } = self.state {
            self.close_segment(since, SegmentEvent::Shutdown);
            self.set_state(DeviceState::Idle);
        }

        self.shared.device().close();

        let stats = self.shared.registry().stats();
        if stats.pending > 0 {
            warn!(
                pending = stats.pending,
                "Device closed with pending tasks; they will not be finished"
            );
        }
        info!(
            segments = self.shared.timeline().len(),
            finished = stats.finished,
            "Capture worker stopped"
        );
    }

    fn apply_config_update(&mut self) {
        if let Some(config) = self.shared.take_config_update() {
            self.shared.device().set_capture_config(config);
            info!("Capture configuration applied to device");
        }
    }

    /// The clock, held at or after the last segment's stop.
    fn now(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        match self.last_stop {
            Some(last) if now < last => {
                warn!(
                    behind_ms = (last - now).num_milliseconds(),
                    "Clock stepped back; holding segment times at the last stop"
                );
                last
            }
            _ => now,
        }
    }

    fn start(&mut self) {
        let started = self.shared.device().start_capture();
        if started {
            let since = self.now();
            info!(failed_attempts = self.failed_starts, "Device capturing");
            self.failed_starts = 0;
            self.set_state(DeviceState::Capturing { since });
        } else {
            self.failed_starts += 1;
            warn!(
                attempt = self.failed_starts,
                "Device failed to start capturing, retrying next tick"
            );
        }
    }

    fn split_due(&self, since: DateTime<Utc>) -> bool {
        match self.split_interval {
            Some(interval) => self.clock.now() - since >= interval,
            None => false,
        }
    }

    /// Split or stop the device, then record and fan out the segment.
    /// Returns the segment's stop time.
    ///
    /// The stop time and the tasks the segment belongs to are read together;
    /// requests that land during the device call count toward the next one.
    fn close_segment(&mut self, since: DateTime<Utc>, event: SegmentEvent) -> DateTime<Utc> {
        let (stop, cohort) = {
            let registry = self.shared.registry();
            (self.now().max(since), registry.cohort())
        };
        let path = self.namer.trace_path(since, stop);

        let saved = {
            let mut device = self.shared.device();
            match event {
                SegmentEvent::Split => device.split_capture(&path),
                SegmentEvent::Stop | SegmentEvent::Shutdown => device.stop_capture(&path),
            }
        };

        let segment = TraceSegment::new(
            since,
            stop,
            saved
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        if segment.is_saved() {
            info!(
                segment.path = %segment.path,
                segment.event = %event,
                segment.secs = (stop - since).num_seconds(),
                "Trace saved"
            );
        } else {
            warn!(
                segment.requested = %path.display(),
                segment.event = %event,
                "Device saved no trace"
            );
        }

        // Readers that see the segment on the timeline also see it attached.
        let mut timeline = self.shared.timeline_mut();
        if let Err(e) = timeline.append(segment.clone()) {
            error!(error = %e, "Trace timeline rejected segment");
        }
        let outcome = self
            .shared
            .registry()
            .attach_segment(&segment, &cohort, event);
        drop(timeline);
        debug!(
            running = outcome.attached_running,
            finalized = ?outcome.finalized,
            "Segment fanned out"
        );

        self.last_stop = Some(stop);
        stop
    }

    fn set_state(&mut self, state: DeviceState) {
        self.state = state;
        self.shared
            .capturing
            .store(state.is_capturing(), Ordering::SeqCst);
    }
}
