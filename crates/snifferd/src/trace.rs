//! Trace segments and how their files are named and published.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One trace file produced by a device split or stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSegment {
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
    /// Where the device saved the trace. Empty when the save failed.
    pub path: String,
}

impl TraceSegment {
    pub fn new(start_time: DateTime<Utc>, stop_time: DateTime<Utc>, path: impl Into<String>) -> Self {
        Self {
            start_time,
            stop_time,
            path: path.into(),
        }
    }

    /// False when the device reported that nothing was saved.
    pub fn is_saved(&self) -> bool {
        !self.path.is_empty()
    }

    /// Half-open overlap with `[start, stop)`.
    pub fn overlaps(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> bool {
        self.stop_time > start && self.start_time < stop
    }
}

/// Chooses the file a segment covering `[start, stop]` is saved into.
pub trait TraceNamer: Send + Sync {
    fn trace_path(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> PathBuf;
}

impl<F> TraceNamer for F
where
    F: Fn(DateTime<Utc>, DateTime<Utc>) -> PathBuf + Send + Sync,
{
    fn trace_path(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> PathBuf {
        self(start, stop)
    }
}

/// `cap-<start>-<stop>.btt` in a fixed directory, timestamps in UTC.
///
/// Stamps have one-second resolution. When a name was just handed out or
/// already exists on disk, a `-1`, `-2`, ... suffix is added before the
/// extension.
#[derive(Debug)]
pub struct TimestampNamer {
    dir: PathBuf,
    extension: String,
    /// Last base name issued and how many suffixes it has used.
    last: Mutex<Option<(String, u32)>>,
}

impl TimestampNamer {
    const STAMP: &'static str = "%y%m%d_%H%M%S";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: "btt".to_string(),
            last: Mutex::new(None),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    fn file(&self, base: &str, seq: u32) -> PathBuf {
        match seq {
            0 => self.dir.join(format!("{}.{}", base, self.extension)),
            n => self.dir.join(format!("{}-{}.{}", base, n, self.extension)),
        }
    }
}

impl TraceNamer for TimestampNamer {
    fn trace_path(&self, start: DateTime<Utc>, stop: DateTime<Utc>) -> PathBuf {
        let base = format!("cap-{}-{}", start.format(Self::STAMP), stop.format(Self::STAMP));
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        let mut seq = match last.as_ref() {
            Some((prev, used)) if *prev == base => used + 1,
            _ => 0,
        };
        let mut path = self.file(&base, seq);
        while path.exists() {
            seq += 1;
            path = self.file(&base, seq);
        }

        *last = Some((base, seq));
        path
    }
}

/// Maps saved trace paths to the URLs clients download them from.
///
/// The capture directory is published under `url_base`; a trace's URL is
/// the base plus its file name. With an empty base, paths are reported as-is.
#[derive(Debug, Clone, Default)]
pub struct TraceLocator {
    url_base: String,
    capture_dir: PathBuf,
}

impl TraceLocator {
    pub fn new(url_base: impl Into<String>, capture_dir: impl Into<PathBuf>) -> Self {
        let mut url_base = url_base.into();
        if !url_base.is_empty() && !url_base.ends_with('/') {
            url_base.push('/');
        }
        Self {
            url_base,
            capture_dir: capture_dir.into(),
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.is_empty() || self.url_base.is_empty() {
            return path.to_string();
        }
        match Path::new(path).file_name() {
            Some(name) => format!("{}{}", self.url_base, name.to_string_lossy()),
            None => path.to_string(),
        }
    }

    /// Inverse of `url_for` for URLs under this locator's base.
    pub fn path_for(&self, url: &str) -> String {
        if url.is_empty() || self.url_base.is_empty() {
            return url.to_string();
        }
        match url.strip_prefix(&self.url_base) {
            Some(name) if !name.is_empty() => {
                self.capture_dir.join(name).to_string_lossy().into_owned()
            }
            _ => url.to_string(),
        }
    }
}
