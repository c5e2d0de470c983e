//! In-process stand-in for a capture device.
//!
//! Behaves like a recorder that never touches disk: splits and stops report
//! the requested path as saved. A `SimulatedHandle` shares the device state,
//! so callers can inspect the call log and script failures after the device
//! has been handed to the capture service.

use super::{CaptureConfig, SnifferDevice};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// A recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Start { ok: bool },
    Split { path: PathBuf, ok: bool },
    Stop { path: PathBuf, ok: bool },
    Close,
}

#[derive(Debug, Default)]
struct SimState {
    recording: bool,
    closed: bool,
    config: CaptureConfig,
    calls: Vec<DeviceCall>,
    failing_starts: usize,
    failing_splits: usize,
    failing_stops: usize,
}

/// Simulated sniffer, usable as the default driver and in tests.
pub struct SimulatedSniffer {
    model: String,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSniffer {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    pub fn with_config(self, config: CaptureConfig) -> Self {
        self.lock().config = config;
        self
    }

    /// A handle that observes this device after it has been moved.
    pub fn handle(&self) -> SimulatedHandle {
        SimulatedHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SimulatedSniffer {
    fn default() -> Self {
        Self::new("Simulated sniffer")
    }
}

impl SnifferDevice for SimulatedSniffer {
    fn start_capture(&mut self) -> bool {
        let mut state = self.lock();
        let ok = if state.closed {
            false
        } else if state.failing_starts > 0 {
            state.failing_starts -= 1;
            false
        } else {
            state.recording = true;
            true
        };
        state.calls.push(DeviceCall::Start { ok });
        ok
    }

    fn split_capture(&mut self, trace_path: &Path) -> Option<PathBuf> {
        let mut state = self.lock();
        let ok = if !state.recording || state.closed {
            false
        } else if state.failing_splits > 0 {
            state.failing_splits -= 1;
            false
        } else {
            true
        };
        state.calls.push(DeviceCall::Split {
            path: trace_path.to_path_buf(),
            ok,
        });
        ok.then(|| trace_path.to_path_buf())
    }

    fn stop_capture(&mut self, trace_path: &Path) -> Option<PathBuf> {
        let mut state = self.lock();
        let ok = if !state.recording || state.closed {
            false
        } else if state.failing_stops > 0 {
            state.failing_stops -= 1;
            false
        } else {
            true
        };
        // A failed save still ends the recording; the trace is lost.
        state.recording = false;
        state.calls.push(DeviceCall::Stop {
            path: trace_path.to_path_buf(),
            ok,
        });
        ok.then(|| trace_path.to_path_buf())
    }

    fn close(&mut self) {
        let mut state = self.lock();
        state.recording = false;
        state.closed = true;
        state.calls.push(DeviceCall::Close);
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_capturing(&self) -> bool {
        let state = self.lock();
        state.recording && !state.closed
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn capture_config(&self) -> CaptureConfig {
        self.lock().config.clone()
    }

    fn set_capture_config(&mut self, config: CaptureConfig) {
        self.lock().config = config;
    }
}

/// Shared view of a `SimulatedSniffer`.
#[derive(Clone)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().calls.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Make the next `n` start attempts fail.
    pub fn fail_next_starts(&self, n: usize) {
        self.lock().failing_starts = n;
    }

    /// Make the next `n` splits report that nothing was saved.
    pub fn fail_next_splits(&self, n: usize) {
        self.lock().failing_splits = n;
    }

    /// Make the next `n` stops report that nothing was saved.
    pub fn fail_next_stops(&self, n: usize) {
        self.lock().failing_stops = n;
    }

    pub fn start_attempts(&self) -> usize {
        self.count(|call| matches!(call, DeviceCall::Start { .. }))
    }

    pub fn splits(&self) -> usize {
        self.count(|call| matches!(call, DeviceCall::Split { .. }))
    }

    pub fn stops(&self) -> usize {
        self.count(|call| matches!(call, DeviceCall::Stop { .. }))
    }

    fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| pred(call)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_split_stop() {
        let mut device = SimulatedSniffer::default();
        let handle = device.handle();

        assert!(device.start_capture());
        assert!(device.is_capturing());

        let split = device.split_capture(Path::new("/traces/a.btt"));
        assert_eq!(split, Some(PathBuf::from("/traces/a.btt")));
        assert!(device.is_capturing());

        let stopped = device.stop_capture(Path::new("/traces/b.btt"));
        assert_eq!(stopped, Some(PathBuf::from("/traces/b.btt")));
        assert!(!device.is_capturing());
        assert_eq!(handle.splits(), 1);
        assert_eq!(handle.stops(), 1);
    }

    #[test]
    fn test_split_while_idle_saves_nothing() {
        let mut device = SimulatedSniffer::default();
        assert_eq!(device.split_capture(Path::new("/traces/a.btt")), None);
        assert_eq!(device.stop_capture(Path::new("/traces/a.btt")), None);
    }

    #[test]
    fn test_scripted_failures() {
        let mut device = SimulatedSniffer::default();
        let handle = device.handle();
        handle.fail_next_starts(2);

        assert!(!device.start_capture());
        assert!(!device.start_capture());
        assert!(device.start_capture());
        assert_eq!(handle.start_attempts(), 3);

        handle.fail_next_splits(1);
        assert_eq!(device.split_capture(Path::new("/t/1.btt")), None);
        assert!(device.is_capturing());
        assert!(device.split_capture(Path::new("/t/2.btt")).is_some());
    }

    #[test]
    fn test_closed_device_refuses_to_start() {
        let mut device = SimulatedSniffer::default();
        device.close();
        assert!(device.is_closed());
        assert!(!device.start_capture());
        assert_eq!(
            device.handle().calls(),
            vec![DeviceCall::Close, DeviceCall::Start { ok: false }]
        );
    }
}
