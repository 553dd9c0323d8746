//! Telemetry aggregation channels
//!
//! Two unbounded multi-producer/single-consumer channels carry worker
//! telemetry to the one attached consumer:
//!
//! ```text
//!  worker process 0 ──stdout──► pump-0 ─┐
//!  worker process 1 ──stdout──► pump-1 ─┼──► progress channel ──┐
//!  worker process N ──stdout──► pump-N ─┘    output channel   ──┴──► consumer
//! ```
//!
//! Workers write one JSON document per line; each pump thread decodes its
//! pipe and forwards into the shared channels. Nothing applies backpressure:
//! a slow consumer grows the channels without bound.

use crate::error::ChannelError;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// One task resolution reported by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    /// Reporting worker
    pub worker_id: String,

    /// Seeds resolved so far by this worker
    pub completed: u64,

    /// Seeds in this worker's shard
    pub total: u64,
}

/// One captured line of callback output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    /// Worker whose callback produced the line
    pub worker_id: String,

    /// The text, without trailing newline
    pub line: String,
}

/// Wire form of a telemetry message (one JSON object per line)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Telemetry {
    Progress(ProgressMessage),
    Output(OutputLine),
}

impl Telemetry {
    /// Encode as a single JSON line (no trailing newline)
    pub fn encode(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self).map_err(|e| ChannelError::Decode {
            line: format!("{:?}", self),
            reason: e.to_string(),
        })
    }

    /// Decode one JSON line
    pub fn decode(line: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(line).map_err(|e| ChannelError::Decode {
            line: line.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Producer half of the aggregation channels
#[derive(Debug, Clone)]
pub struct TelemetrySender {
    progress: Sender<ProgressMessage>,
    output: Sender<OutputLine>,
}

impl TelemetrySender {
    /// Post a progress tick
    pub fn send_progress(&self, msg: ProgressMessage) -> Result<(), ChannelError> {
        self.progress.send(msg).map_err(|_| ChannelError::Send)
    }

    /// Post an output line
    pub fn send_output(&self, line: OutputLine) -> Result<(), ChannelError> {
        self.output.send(line).map_err(|_| ChannelError::Send)
    }

    /// Route a decoded wire message to its channel
    pub fn forward(&self, msg: Telemetry) -> Result<(), ChannelError> {
        match msg {
            Telemetry::Progress(p) => self.send_progress(p),
            Telemetry::Output(o) => self.send_output(o),
        }
    }
}

/// Consumer half of the aggregation channels
#[derive(Debug)]
pub struct TelemetryReceiver {
    progress: Receiver<ProgressMessage>,
    output: Receiver<OutputLine>,
}

impl TelemetryReceiver {
    /// Take every progress message currently queued.
    ///
    /// Returns `ChannelError::Disconnected` only once all producers are gone
    /// and nothing is left to drain.
    pub fn drain_progress(&self) -> Result<Vec<ProgressMessage>, ChannelError> {
        drain(&self.progress)
    }

    /// Take every output line currently queued.
    pub fn drain_output(&self) -> Result<Vec<OutputLine>, ChannelError> {
        drain(&self.output)
    }

    /// Raw progress receiver, for blocking `select!` loops
    pub fn progress(&self) -> &Receiver<ProgressMessage> {
        &self.progress
    }

    /// Raw output receiver, for blocking `select!` loops
    pub fn output(&self) -> &Receiver<OutputLine> {
        &self.output
    }
}

fn drain<T>(rx: &Receiver<T>) -> Result<Vec<T>, ChannelError> {
    let mut items = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(item) => items.push(item),
            Err(TryRecvError::Empty) => return Ok(items),
            Err(TryRecvError::Disconnected) => {
                if items.is_empty() {
                    return Err(ChannelError::Disconnected);
                }
                return Ok(items);
            }
        }
    }
}

/// Create the progress/output channel pair
pub fn telemetry_channels() -> (TelemetrySender, TelemetryReceiver) {
    let (progress_tx, progress_rx) = unbounded();
    let (output_tx, output_rx) = unbounded();
    (
        TelemetrySender {
            progress: progress_tx,
            output: output_tx,
        },
        TelemetryReceiver {
            progress: progress_rx,
            output: output_rx,
        },
    )
}

/// Counters from one pump thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Messages forwarded into the channels
    pub forwarded: u64,

    /// Lines that failed to decode
    pub malformed: u64,
}

/// Spawn a thread that decodes `source` line by line into `tx`.
///
/// The thread ends when the source reaches EOF (the worker exited). If the
/// consumer has gone away it keeps reading and discards, so the worker never
/// stalls on a full pipe.
pub fn spawn_pump<R>(worker_id: &str, source: R, tx: TelemetrySender) -> io::Result<JoinHandle<PumpStats>>
where
    R: Read + Send + 'static,
{
    let id = worker_id.to_string();
    thread::Builder::new()
        .name(format!("pump-{}", id))
        .spawn(move || pump_loop(&id, source, tx))
}

fn pump_loop<R: Read>(worker_id: &str, source: R, tx: TelemetrySender) -> PumpStats {
    let mut stats = PumpStats::default();
    let mut consumer_gone = false;

    for line in BufReader::new(source).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(worker = %worker_id, error = %e, "Telemetry pipe read failed");
                break;
            }
        };
        if line.trim().is_empty() || consumer_gone {
            continue;
        }

        match Telemetry::decode(&line) {
            Ok(msg) => {
                if tx.forward(msg).is_err() {
                    debug!(worker = %worker_id, "Consumer gone, discarding telemetry");
                    consumer_gone = true;
                } else {
                    stats.forwarded += 1;
                }
            }
            Err(e) => {
                stats.malformed += 1;
                warn!(worker = %worker_id, error = %e, "Skipping telemetry line");
            }
        }
    }

    debug!(
        worker = %worker_id,
        forwarded = stats.forwarded,
        malformed = stats.malformed,
        "Telemetry pump finished"
    );
    stats
}
