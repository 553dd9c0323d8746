//! Plain progress reporting
//!
//! Provides the run header and summary, and [`LineLogger`], the consumer
//! used when the dashboard is off.

use crate::channel::{OutputLine, ProgressMessage, TelemetryReceiver};
use crate::config::RunConfig;
use crate::orchestrator::{ConsumerReport, RunSummary, TelemetryConsumer, WorkerControl};
use console::style;
use crossbeam_channel::{never, select, Receiver};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often a blocked logger re-checks the shutdown flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Consumer that prints every output line and logs worker completion
pub struct LineLogger<W: Write> {
    out: W,
    shutdown: Arc<AtomicBool>,
}

impl LineLogger<io::Stdout> {
    /// Logger printing to stdout
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> LineLogger<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop consuming once `flag` is raised
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn print(&mut self, line: &OutputLine) {
        if let Err(e) = writeln!(self.out, "{}", line.line) {
            warn!(worker = %line.worker_id, error = %e, "Failed to print output line");
        }
    }
}

impl<W: Write> TelemetryConsumer for LineLogger<W> {
    fn consume(
        &mut self,
        rx: &TelemetryReceiver,
        workers: &dyn WorkerControl,
        seed_total: u64,
    ) -> ConsumerReport {
        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut output_lines = 0;
        let mut interrupted = false;

        // A disconnected receiver is always ready; swap it for one that never is.
        let closed_progress: Receiver<ProgressMessage> = never();
        let closed_output: Receiver<OutputLine> = never();
        let mut progress_open = true;
        let mut output_open = true;

        debug!(workers = workers.count(), seeds = seed_total, "Logging telemetry");

        while progress_open || output_open {
            if self.shutdown.load(Ordering::Relaxed) {
                interrupted = true;
                break;
            }

            let progress = if progress_open { rx.progress() } else { &closed_progress };
            let output = if output_open { rx.output() } else { &closed_output };

            select! {
                recv(progress) -> msg => match msg {
                    Ok(msg) => {
                        let completed = counts.entry(msg.worker_id.clone()).or_default();
                        *completed = (*completed).max(msg.completed);
                        if msg.completed == msg.total {
                            info!(worker = %msg.worker_id, seeds = msg.total, "Worker finished its shard");
                        }
                    }
                    Err(_) => progress_open = false,
                },
                recv(output) -> line => match line {
                    Ok(line) => {
                        output_lines += 1;
                        self.print(&line);
                    }
                    Err(_) => output_open = false,
                },
                default(SHUTDOWN_POLL) => {}
            }
        }

        if let Err(e) = self.out.flush() {
            warn!(error = %e, "Failed to flush output");
        }

        ConsumerReport {
            completed: counts.values().sum(),
            output_lines,
            interrupted,
        }
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a header at the start of the run
pub fn print_header(config: &RunConfig, run_dir: &Path, seeds: usize) {
    println!();
    println!("{} {}", style("shardrun").cyan().bold(), env!("CARGO_PKG_VERSION"));
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Scan:").bold(), config.scan_name);
    println!("  {} {}", style("Run dir:").bold(), run_dir.display());
    println!("  {} {}", style("Seeds:").bold(), format_number(seeds as u64));
    println!(
        "  {} {} ({} probes each)",
        style("Processes:").bold(),
        config.proc_num,
        config.pool_size
    );
    println!("  {} {}s", style("Timeout:").bold(), config.pool_timeout);
    println!(
        "  {} {} -> {}",
        style("Plugins:").bold(),
        config.probe,
        config.callback
    );
    println!();
}

/// Print a summary of the run
pub fn print_summary(summary: &RunSummary) {
    let duration_secs = summary.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        summary.completed as f64 / duration_secs
    } else {
        0.0
    };

    let title = if summary.interrupted {
        style("Run Interrupted").yellow().bold()
    } else {
        style("Run Complete").green().bold()
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {} / {}",
        style("Resolved:").bold(),
        format_number(summary.completed),
        format_number(summary.seeds)
    );
    println!("  {} {}", style("Workers:").bold(), summary.workers);
    println!(
        "  {} {}",
        style("Output lines:").bold(),
        format_number(summary.output_lines)
    );
    println!(
        "  {} {:.1}s ({:.0} seeds/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if summary.abnormal_exits > 0 {
        println!(
            "  {} {} (see <shard>.log in the run directory)",
            style("Worker failures:").yellow().bold(),
            summary.abnormal_exits
        );
    }
    if summary.malformed > 0 {
        println!(
            "  {} {}",
            style("Malformed telemetry:").yellow().bold(),
            format_number(summary.malformed)
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::telemetry_channels;
    use std::thread;

    struct Exited;

    impl WorkerControl for Exited {
        fn count(&self) -> usize {
            1
        }

        fn all_exited(&self) -> bool {
            true
        }

        fn terminate(&self, _grace: Duration) {}
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_line_logger_prints_until_disconnect() {
        let (tx, rx) = telemetry_channels();
        let producer = thread::spawn(move || {
            for i in 1..=3 {
                tx.send_output(OutputLine {
                    worker_id: "scan_00".into(),
                    line: format!("result {}", i),
                })
                .unwrap();
                tx.send_progress(ProgressMessage {
                    worker_id: "scan_00".into(),
                    completed: i,
                    total: 3,
                })
                .unwrap();
            }
        });

        let mut logger = LineLogger::new(Vec::new());
        let report = logger.consume(&rx, &Exited, 3);
        producer.join().unwrap();

        assert_eq!(report.completed, 3);
        assert_eq!(report.output_lines, 3);
        assert!(!report.interrupted);
        let printed = String::from_utf8(logger.into_inner()).unwrap();
        assert_eq!(printed, "result 1\nresult 2\nresult 3\n");
    }

    #[test]
    fn test_line_logger_stops_on_shutdown() {
        let (_tx, rx) = telemetry_channels();
        let flag = Arc::new(AtomicBool::new(true));
        let mut logger = LineLogger::new(Vec::new()).with_shutdown(flag);

        let report = logger.consume(&rx, &Exited, 3);
        assert!(report.interrupted);
    }
}
