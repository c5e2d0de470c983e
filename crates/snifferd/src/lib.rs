//! snifferd - capture orchestration for a single sniffer.
//!
//! Clients start and stop capture tasks at will; one worker thread keeps the
//! device recording while any task runs, splits the recording on an interval,
//! and hands every resulting trace file to the tasks whose window it covers.
//!
//! Library exposing core modules for the binary and for tests.

pub mod archive;
pub mod clock;
pub mod device;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod service;
pub mod task;
pub mod telemetry;
pub mod timeline;
pub mod trace;
pub mod web;

pub use archive::{ArchiveError, RecordError, TaskArchive};
pub use clock::{Clock, ManualClock, SystemClock};
pub use device::{CaptureConfig, SimulatedHandle, SimulatedSniffer, SnifferDevice};
pub use error::CaptureError;
pub use service::{CaptureService, CaptureServiceBuilder, CaptureSettings, ServiceStats, ShutdownReport};
pub use task::{CaptureTask, TaskRecord, TaskStatus};
pub use trace::{TimestampNamer, TraceLocator, TraceNamer, TraceSegment};
