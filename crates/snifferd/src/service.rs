//! The capture service: the one handle request code holds.
//!
//! Built once at startup with `CaptureService::builder`, which loads the
//! archive and spawns the capture worker thread. Request operations never
//! touch the device; the worker picks up registry and configuration changes
//! within one poll period.

use crate::archive::TaskArchive;
use crate::clock::{Clock, SystemClock};
use crate::device::{CaptureConfig, SnifferDevice};
use crate::error::CaptureError;
use crate::orchestrator::{CaptureWorker, Shared};
use crate::registry::TaskRegistry;
use crate::task::{CaptureTask, TaskRecord};
use crate::trace::{TimestampNamer, TraceLocator, TraceNamer, TraceSegment};
use serde::Serialize;
use snifferconf::SnifferConfig;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Worker timing and where traces go.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub poll_interval: Duration,
    /// `None` disables splitting.
    pub split_interval: Option<chrono::Duration>,
    pub capture_dir: PathBuf,
    /// Published location of `capture_dir`; empty reports raw paths.
    pub url_base: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            split_interval: split_interval_from_secs(120),
            capture_dir: PathBuf::from("traces"),
            url_base: String::new(),
        }
    }
}

impl CaptureSettings {
    pub fn from_config(config: &SnifferConfig) -> Self {
        let capture = &config.infra.capture;
        Self {
            poll_interval: Duration::from_millis(capture.poll_interval_ms.max(1)),
            split_interval: split_interval_from_secs(capture.split_interval_secs),
            capture_dir: config.infra.paths.capture_dir.clone(),
            url_base: capture.trace_url_base.clone(),
        }
    }

    pub fn locator(&self) -> TraceLocator {
        TraceLocator::new(self.url_base.clone(), self.capture_dir.clone())
    }
}

/// Zero or negative disables splitting.
pub fn split_interval_from_secs(secs: i64) -> Option<chrono::Duration> {
    (secs > 0).then(|| chrono::Duration::seconds(secs))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub running: usize,
    pub pending: usize,
    pub finished: usize,
    pub segments: usize,
    pub capturing: bool,
    pub shutting_down: bool,
}

/// What shutdown did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Tasks that were still running and were stopped by shutdown.
    pub stopped: Vec<String>,
    /// Tasks left pending because no final segment was produced.
    pub lost_pending: Vec<String>,
    pub finished: usize,
    pub segments: usize,
    /// Records written to the archive, if it was saved.
    pub archived: Option<usize>,
    /// Why the archive was not saved.
    pub archive_error: Option<String>,
    pub worker_panicked: bool,
}

pub struct CaptureServiceBuilder {
    device: Box<dyn SnifferDevice>,
    settings: CaptureSettings,
    archive: Option<TaskArchive>,
    namer: Option<Arc<dyn TraceNamer>>,
    clock: Arc<dyn Clock>,
}

impl CaptureServiceBuilder {
    pub fn settings(mut self, settings: CaptureSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Load finished tasks from `archive` now and save them back at shutdown.
    pub fn archive(mut self, archive: TaskArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Defaults to a `TimestampNamer` in the capture directory.
    pub fn namer(mut self, namer: Arc<dyn TraceNamer>) -> Self {
        self.namer = Some(namer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load the archive and start the capture worker.
    pub fn spawn(self) -> Result<CaptureService, CaptureError> {
        let CaptureServiceBuilder {
            device,
            settings,
            archive,
            namer,
            clock,
        } = self;

        let finished = archive.as_ref().map(TaskArchive::load).unwrap_or_default();
        let registry = TaskRegistry::with_finished(finished);
        let model = device.model().to_string();
        let shared = Arc::new(Shared::new(registry, device));

        let namer: Arc<dyn TraceNamer> = match namer {
            Some(namer) => namer,
            None => Arc::new(TimestampNamer::new(settings.capture_dir.clone())),
        };
        let worker = CaptureWorker::new(
            Arc::clone(&shared),
            namer,
            Arc::clone(&clock),
            settings.split_interval,
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let poll = settings.poll_interval;
        let handle = thread::Builder::new()
            .name("capture-worker".to_string())
            .spawn(move || worker.run(shutdown_rx, poll))
            .map_err(CaptureError::Spawn)?;

        info!(
            device.model = %model,
            capture_dir = %settings.capture_dir.display(),
            finished = shared.registry().stats().finished,
            "Capture service started"
        );

        Ok(CaptureService {
            shared,
            clock,
            locator: archive
                .as_ref()
                .map(|a| a.locator().clone())
                .unwrap_or_else(|| settings.locator()),
            archive,
            model,
            worker: Mutex::new(Some(WorkerHandle {
                shutdown_tx,
                handle,
            })),
        })
    }
}

struct WorkerHandle {
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Shared entry point for task operations; wrap it in an `Arc` to share.
pub struct CaptureService {
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
    locator: TraceLocator,
    archive: Option<TaskArchive>,
    model: String,
    worker: Mutex<Option<WorkerHandle>>,
}

impl CaptureService {
    pub fn builder(device: impl SnifferDevice + 'static) -> CaptureServiceBuilder {
        CaptureServiceBuilder {
            device: Box::new(device),
            settings: CaptureSettings::default(),
            archive: None,
            namer: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn start_new_task(
        &self,
        id: &str,
        owner: &str,
        host: &str,
    ) -> Result<CaptureTask, CaptureError> {
        let mut registry = self.shared.registry();
        self.ensure_accepting()?;
        registry.start_new_task(id, owner, host, self.clock.now())
    }

    /// Stop a task. Returns at once; the task stays pending until the
    /// worker's next split or stop gives it its final trace.
    pub fn stop_task(&self, id: &str) -> Result<CaptureTask, CaptureError> {
        let mut registry = self.shared.registry();
        self.ensure_accepting()?;
        registry.stop_task(id, self.clock.now())
    }

    pub fn get_task_by_id(&self, id: &str) -> Result<CaptureTask, CaptureError> {
        self.shared
            .registry()
            .get_by_id(id)
            .ok_or_else(|| CaptureError::TaskNotFound(id.to_string()))
    }

    pub fn list_running(&self) -> Vec<CaptureTask> {
        self.shared.registry().list_running()
    }

    pub fn list_pending(&self) -> Vec<CaptureTask> {
        self.shared.registry().list_pending()
    }

    pub fn list_finished(&self) -> Vec<CaptureTask> {
        self.shared.registry().list_finished()
    }

    pub fn get_controller_model(&self) -> &str {
        &self.model
    }

    pub fn get_capture_config(&self) -> CaptureConfig {
        self.shared.capture_config()
    }

    /// Returns at once; the worker hands the configuration to the device
    /// before its next device call.
    pub fn set_capture_config(&self, config: CaptureConfig) -> Result<(), CaptureError> {
        self.ensure_accepting()?;
        self.shared.queue_capture_config(config);
        info!("Capture configuration updated");
        Ok(())
    }

    /// Download URLs of the traces attached to a task so far.
    pub fn trace_list(&self, id: &str) -> Result<Vec<String>, CaptureError> {
        let task = self.get_task_by_id(id)?;
        Ok(task
            .traces()
            .iter()
            .map(|p| self.locator.url_for(p))
            .collect())
    }

    /// Segments of this run whose span overlaps the task's, recomputed from
    /// the timeline. A running task's window extends to now.
    pub fn covering_segments(&self, id: &str) -> Result<Vec<TraceSegment>, CaptureError> {
        let task = self.get_task_by_id(id)?;
        let Some(start) = task.start_time() else {
            return Ok(Vec::new());
        };
        let stop = task.stop_time().unwrap_or_else(|| self.clock.now());
        Ok(self.shared.timeline().segments_overlapping(start, stop))
    }

    pub fn record(&self, task: &CaptureTask) -> TaskRecord {
        task.to_record(&self.locator)
    }

    pub fn locator(&self) -> &TraceLocator {
        &self.locator
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ServiceStats {
        let tasks = self.shared.registry().stats();
        ServiceStats {
            running: tasks.running,
            pending: tasks.pending,
            finished: tasks.finished,
            segments: self.shared.timeline().len(),
            capturing: self.shared.is_capturing(),
            shutting_down: self.is_shutting_down(),
        }
    }

    /// Stop everything and persist finished tasks.
    ///
    /// Running tasks are stopped and new operations refused. Then the worker
    /// makes its final stop, closes the device and exits. Only after it has
    /// exited is the archive written. A failed save is reported, not raised.
    /// Blocks until the worker exits; call it off the async runtime.
    pub fn shutdown(&self) -> Result<ShutdownReport, CaptureError> {
        let mut report = ShutdownReport::default();

        {
            let mut registry = self.shared.registry();
            if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
                return Err(CaptureError::ShuttingDown);
            }
            report.stopped = registry.stop_all_running(self.clock.now());
        }
        info!(stopped = report.stopped.len(), "Capture service shutting down");

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(WorkerHandle {
            shutdown_tx,
            handle,
        }) = worker
        {
            // The worker may already have exited; either way it stops.
            let _ = shutdown_tx.send(());
            if handle.join().is_err() {
                error!("Capture worker panicked");
                report.worker_panicked = true;
            }
        }

        {
            let mut device = self.shared.device();
            if !device.is_closed() {
                warn!("Capture worker exited without closing the device");
                device.close();
            }
        }

        report.segments = self.shared.timeline().len();
        let registry = self.shared.registry();
        report.lost_pending = registry
            .list_pending()
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        report.finished = registry.stats().finished;

        if let Some(archive) = &self.archive {
            match archive.save(registry.finished()) {
                Ok(count) => report.archived = Some(count),
                Err(e) => {
                    error!(
                        archive.path = %archive.path().display(),
                        error = %e,
                        "Failed to save finished tasks"
                    );
                    report.archive_error = Some(e.to_string());
                }
            }
        }

        info!(
            finished = report.finished,
            segments = report.segments,
            lost_pending = report.lost_pending.len(),
            "Capture service stopped"
        );
        Ok(report)
    }

    fn ensure_accepting(&self) -> Result<(), CaptureError> {
        if self.is_shutting_down() {
            Err(CaptureError::ShuttingDown)
        } else {
            Ok(())
        }
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        if !self.is_shutting_down() {
            let _ = self.shutdown();
        }
    }
}

/// Records for a batch of tasks, in the given order.
pub fn records(service: &CaptureService, tasks: &[CaptureTask]) -> Vec<TaskRecord> {
    tasks.iter().map(|t| service.record(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedSniffer;

    fn fast_settings() -> CaptureSettings {
        CaptureSettings {
            poll_interval: Duration::from_millis(5),
            ..CaptureSettings::default()
        }
    }

    #[test]
    fn test_split_interval_from_secs() {
        assert_eq!(split_interval_from_secs(0), None);
        assert_eq!(split_interval_from_secs(-5), None);
        assert_eq!(
            split_interval_from_secs(30),
            Some(chrono::Duration::seconds(30))
        );
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = SnifferConfig::default();
        config.infra.capture.poll_interval_ms = 0;
        config.infra.capture.split_interval_secs = -1;
        config.infra.capture.trace_url_base = "ftp://h".to_string();

        let settings = CaptureSettings::from_config(&config);
        assert_eq!(settings.poll_interval, Duration::from_millis(1));
        assert_eq!(settings.split_interval, None);
        assert_eq!(
            settings.locator().url_for("/x/cap-1.btt"),
            "ftp://h/cap-1.btt"
        );
    }

    #[test]
    fn test_operations_refused_after_shutdown() {
        let service = CaptureService::builder(SimulatedSniffer::default())
            .settings(fast_settings())
            .spawn()
            .unwrap();
        service.start_new_task("t0", "alice", "h").unwrap();
        service.shutdown().unwrap();

        assert!(matches!(
            service.start_new_task("t1", "alice", "h"),
            Err(CaptureError::ShuttingDown)
        ));
        assert!(matches!(service.stop_task("t0"), Err(CaptureError::ShuttingDown)));
        assert!(matches!(
            service.set_capture_config(CaptureConfig::default()),
            Err(CaptureError::ShuttingDown)
        ));
        assert!(matches!(service.shutdown(), Err(CaptureError::ShuttingDown)));
        assert!(service.stats().shutting_down);
    }

    #[test]
    fn test_model_and_config() {
        let mut config = CaptureConfig::default();
        config.wifi_capture_channel = Some(11);
        let service = CaptureService::builder(
            SimulatedSniffer::new("Bench analyzer").with_config(config.clone()),
        )
        .settings(fast_settings())
        .spawn()
        .unwrap();

        assert_eq!(service.get_controller_model(), "Bench analyzer");
        assert_eq!(service.get_capture_config(), config);

        config.spectrum_capture_enabled = true;
        service.set_capture_config(config.clone()).unwrap();
        assert_eq!(service.get_capture_config(), config);
    }

    #[test]
    fn test_drop_closes_device() {
        let sniffer = SimulatedSniffer::default();
        let handle = sniffer.handle();
        let service = CaptureService::builder(sniffer)
            .settings(fast_settings())
            .spawn()
            .unwrap();
        drop(service);
        assert!(handle.is_closed());
    }

    /// Blocks in `start_capture` until released.
    struct StuckSniffer {
        inner: SimulatedSniffer,
        entered: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
    }

    impl SnifferDevice for StuckSniffer {
        fn start_capture(&mut self) -> bool {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            self.inner.start_capture()
        }

        fn split_capture(&mut self, trace_path: &std::path::Path) -> Option<PathBuf> {
            self.inner.split_capture(trace_path)
        }

        fn stop_capture(&mut self, trace_path: &std::path::Path) -> Option<PathBuf> {
            self.inner.stop_capture(trace_path)
        }

        fn close(&mut self) {
            self.inner.close()
        }

        fn model(&self) -> &str {
            self.inner.model()
        }

        fn is_capturing(&self) -> bool {
            self.inner.is_capturing()
        }

        fn is_closed(&self) -> bool {
            self.inner.is_closed()
        }

        fn capture_config(&self) -> CaptureConfig {
            self.inner.capture_config()
        }

        fn set_capture_config(&mut self, config: CaptureConfig) {
            self.inner.set_capture_config(config)
        }
    }

    #[test]
    fn test_config_requests_do_not_wait_for_device() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let inner = SimulatedSniffer::default();
        let handle = inner.handle();
        let service = Arc::new(
            CaptureService::builder(StuckSniffer {
                inner,
                entered: entered_tx,
                release: release_rx,
            })
            .settings(fast_settings())
            .spawn()
            .unwrap(),
        );

        service.start_new_task("t0", "alice", "h").unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // The worker is parked inside start_capture holding the device.
        let (done_tx, done_rx) = mpsc::channel();
        let caller = Arc::clone(&service);
        thread::spawn(move || {
            let mut config = caller.get_capture_config();
            config.wifi_capture_channel = Some(3);
            caller.set_capture_config(config.clone()).unwrap();
            caller.start_new_task("t1", "bob", "h").unwrap();
            caller.stop_task("t1").unwrap();
            let _ = done_tx.send(caller.get_capture_config());
        });
        let seen = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seen.wifi_capture_channel, Some(3));

        release_tx.send(()).unwrap();
        let report = service.shutdown().unwrap();
        assert!(report.lost_pending.is_empty());
        assert!(handle.is_closed());
    }
}
