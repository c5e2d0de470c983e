//! Append-only record of the trace segments produced this run.

use crate::error::CaptureError;
use crate::trace::TraceSegment;
use chrono::{DateTime, Utc};

/// Segments in production order.
///
/// Segments never overlap and each one starts no earlier than the previous
/// one stopped, so both start and stop times are sorted.
#[derive(Debug, Default, Clone)]
pub struct TraceTimeline {
    segments: Vec<TraceSegment>,
}

impl TraceTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment, returning its index.
    ///
    /// A segment that starts before the previous one stopped, or stops
    /// before it starts, is refused and the timeline is left unchanged.
    pub fn append(&mut self, segment: TraceSegment) -> Result<usize, CaptureError> {
        if segment.stop_time < segment.start_time {
            return Err(CaptureError::Invariant(format!(
                "segment '{}' stops before it starts",
                segment.path
            )));
        }
        if let Some(last) = self.segments.last() {
            if segment.start_time < last.stop_time {
                return Err(CaptureError::Invariant(format!(
                    "segment '{}' starts at {} before previous segment stopped at {}",
                    segment.path, segment.start_time, last.stop_time
                )));
            }
        }
        self.segments.push(segment);
        Ok(self.segments.len() - 1)
    }

    /// Segments overlapping the half-open window `[start, stop)`, in order.
    pub fn segments_overlapping(
        &self,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Vec<TraceSegment> {
        // Everything from `end` on starts at or after `stop`.
        let end = self.segments.partition_point(|s| s.start_time < stop);

        // Stop times are sorted too, so walk back until one ends before `start`.
        let mut hits: Vec<TraceSegment> = self.segments[..end]
            .iter()
            .rev()
            .take_while(|s| s.stop_time > start)
            .filter(|s| s.overlaps(start, stop))
            .cloned()
            .collect();
        hits.reverse();
        hits
    }

    pub fn all(&self) -> &[TraceSegment] {
        &self.segments
    }

    pub fn last(&self) -> Option<&TraceSegment> {
        self.segments.last()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
