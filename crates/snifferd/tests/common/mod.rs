//! Shared helpers for capture service integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use snifferd::{
    CaptureService, CaptureSettings, ManualClock, SimulatedHandle, SimulatedSniffer, TaskArchive,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SPLIT_SECS: i64 = 120;

/// A running service over a simulated device, with a clock the test drives.
pub struct Harness {
    pub service: CaptureService,
    pub device: SimulatedHandle,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Move the clock past one split interval.
    pub fn advance_split_interval(&self) {
        self.clock.advance(chrono::Duration::seconds(SPLIT_SECS));
    }

    /// Wait until the worker has started the device and taken its epoch.
    pub fn wait_for_recording(&self) -> Result<()> {
        wait_until("worker capturing", || self.service.stats().capturing)
    }

    pub fn wait_for_segments(&self, n: usize) -> Result<()> {
        wait_until(&format!("{n} segments"), || self.service.stats().segments >= n)
    }
}

pub fn settings(capture_dir: &Path) -> CaptureSettings {
    CaptureSettings {
        poll_interval: Duration::from_millis(5),
        split_interval: Some(chrono::Duration::seconds(SPLIT_SECS)),
        capture_dir: capture_dir.to_path_buf(),
        url_base: "ftp://10.0.0.5/traces".to_string(),
    }
}

pub fn archive_in(dir: &Path) -> TaskArchive {
    let settings = settings(&dir.join("traces"));
    TaskArchive::new(dir.join("state/tasks.json"), settings.locator())
}

/// Service with no archive.
pub fn harness(dir: &Path) -> Result<Harness> {
    build(dir, None)
}

/// Service that loads from and saves to `archive`.
pub fn harness_with_archive(dir: &Path, archive: TaskArchive) -> Result<Harness> {
    build(dir, Some(archive))
}

fn build(dir: &Path, archive: Option<TaskArchive>) -> Result<Harness> {
    let sniffer = SimulatedSniffer::new("Test analyzer");
    let device = sniffer.handle();
    let clock = Arc::new(ManualClock::starting_now());

    let mut builder = CaptureService::builder(sniffer)
        .settings(settings(&dir.join("traces")))
        .clock(clock.clone());
    if let Some(archive) = archive {
        builder = builder.archive(archive);
    }

    Ok(Harness {
        service: builder.spawn()?,
        device,
        clock,
    })
}

/// Poll `cond` every 5ms for up to 5s.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    if cond() {
        return Ok(());
    }
    bail!("timed out waiting for {what}")
}
