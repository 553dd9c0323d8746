//! Worker-side telemetry sinks
//!
//! A worker reports through a [`TelemetrySink`]. Inside a worker process the
//! sink is the process's stdout (one JSON line per message, read by the
//! orchestrator's pump thread); in-process callers can hand the worker a
//! [`TelemetrySender`] directly.

use crate::channel::{OutputLine, ProgressMessage, Telemetry, TelemetrySender};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Destination for a worker's progress ticks and output lines.
///
/// Sends never block on the consumer and never fail the caller.
pub trait TelemetrySink: Send + Sync {
    fn progress(&self, msg: ProgressMessage);
    fn output(&self, line: OutputLine);
}

impl TelemetrySink for TelemetrySender {
    fn progress(&self, msg: ProgressMessage) {
        if self.send_progress(msg).is_err() {
            debug!("Progress dropped: consumer gone");
        }
    }

    fn output(&self, line: OutputLine) {
        if self.send_output(line).is_err() {
            debug!("Output dropped: consumer gone");
        }
    }
}

/// Writes telemetry as JSON lines to stdout
pub struct StdoutTelemetry<W: Write + Send = io::Stdout> {
    out: Mutex<W>,
    broken: AtomicBool,
}

impl StdoutTelemetry {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }
}

impl<W: Write + Send> StdoutTelemetry<W> {
    /// Same framing over any writer
    pub fn with_writer(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            broken: AtomicBool::new(false),
        }
    }

    fn emit(&self, msg: Telemetry) {
        if self.broken.load(Ordering::Relaxed) {
            return;
        }
        let line = match msg.encode() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to encode telemetry");
                return;
            }
        };

        // A panic mid-write leaves at worst a partial line; the pump skips it.
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let written = writeln!(out, "{}", line).and_then(|_| out.flush());
        if let Err(e) = written {
            // Orchestrator is gone; keep probing, stop reporting.
            warn!(error = %e, "Telemetry pipe closed");
            self.broken.store(true, Ordering::Relaxed);
        }
    }
}

impl Default for StdoutTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> TelemetrySink for StdoutTelemetry<W> {
    fn progress(&self, msg: ProgressMessage) {
        self.emit(Telemetry::Progress(msg));
    }

    fn output(&self, line: OutputLine) {
        self.emit(Telemetry::Output(line));
    }
}

/// Handle a callback writes its output through
pub struct OutputSink<'a> {
    worker_id: &'a str,
    sink: &'a dyn TelemetrySink,
}

impl<'a> OutputSink<'a> {
    pub fn new(worker_id: &'a str, sink: &'a dyn TelemetrySink) -> Self {
        Self { worker_id, sink }
    }

    /// Emit text as output; multi-line text becomes one message per line
    pub fn line(&self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            self.send(String::new());
            return;
        }
        for line in text.lines() {
            self.send(line.to_string());
        }
    }

    fn send(&self, line: String) {
        self.sink.output(OutputLine {
            worker_id: self.worker_id.to_string(),
            line,
        });
    }
}
