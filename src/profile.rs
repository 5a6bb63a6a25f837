/*!
 * Chrome Trace Event profiling for the streaming read path
 *
 * When `profile_batches` is nonzero the reader records download-wait and
 * decode spans for the first N batches and writes them as a Chrome Trace
 * Event JSON document (`result.json`), loadable in `chrome://tracing`
 * or Perfetto.
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::error::Result;

/// Default output file for trace profiles
pub const TRACE_OUTPUT: &str = "result.json";

/// One complete ("X" phase) trace event
#[derive(Debug, Clone, Serialize)]
struct TraceEvent {
    name: String,
    cat: String,
    ph: &'static str,
    /// Microseconds since profiler start
    ts: u64,
    /// Duration in microseconds
    dur: u64,
    pid: u32,
    tid: u32,
}

#[derive(Debug, Serialize)]
struct TraceDocument<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: &'a [TraceEvent],
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: &'static str,
    #[serde(rename = "otherData")]
    other_data: TraceMetadata,
}

#[derive(Debug, Serialize)]
struct TraceMetadata {
    recorded_at: String,
    version: &'static str,
}

/// Span recorder bounded to the first `max_batches` batches
#[derive(Debug)]
pub struct TraceProfiler {
    origin: Instant,
    events: Vec<TraceEvent>,
    batches_seen: u32,
    max_batches: u32,
    out_path: PathBuf,
    written: bool,
}

impl TraceProfiler {
    /// Profiler writing to `result.json` in the working directory
    pub fn new(max_batches: u32) -> Self {
        Self::with_output(max_batches, Path::new(TRACE_OUTPUT))
    }

    /// Profiler with an explicit output path
    pub fn with_output(max_batches: u32, out_path: &Path) -> Self {
        Self {
            origin: Instant::now(),
            events: Vec::new(),
            batches_seen: 0,
            max_batches,
            out_path: out_path.to_path_buf(),
            written: false,
        }
    }

    /// True while the profiler is still collecting
    pub fn active(&self) -> bool {
        self.batches_seen < self.max_batches
    }

    /// Record a completed span
    pub fn record(&mut self, name: &str, category: &str, started: Instant) {
        if !self.active() {
            return;
        }
        let ts = started.duration_since(self.origin).as_micros() as u64;
        let dur = started.elapsed().as_micros() as u64;
        self.events.push(TraceEvent {
            name: name.to_string(),
            cat: category.to_string(),
            ph: "X",
            ts,
            dur,
            pid: std::process::id(),
            tid: 0,
        });
    }

    /// Count one batch boundary; collection stops after `max_batches`
    pub fn batch_done(&mut self) {
        self.batches_seen += 1;
    }

    /// Write the trace document
    pub fn write(&mut self) -> Result<()> {
        if self.written {
            return Ok(());
        }
        let doc = TraceDocument {
            trace_events: &self.events,
            display_time_unit: "ms",
            other_data: TraceMetadata {
                recorded_at: chrono::Utc::now().to_rfc3339(),
                version: env!("CARGO_PKG_VERSION"),
            },
        };
        fs::write(&self.out_path, serde_json::to_vec_pretty(&doc)?)?;
        self.written = true;
        info!(
            path = %self.out_path.display(),
            events = self.events.len(),
            "wrote trace profile"
        );
        Ok(())
    }
}

impl Drop for TraceProfiler {
    fn drop(&mut self) {
        let _ = self.write();
    }
}
