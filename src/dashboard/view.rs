//! Terminal rendering of the dashboard
//!
//! Three panes, top to bottom: one bar per worker, the aggregate bar with
//! elapsed time and rate, and the output tail.

use super::state::DashboardState;
use crate::progress::format_number;
use console::{style, Term};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use tracing::debug;

/// Rendering surface driven by the dashboard loop
pub trait DashboardView {
    /// Per-worker progress pane
    fn draw_progress(&mut self, state: &DashboardState);

    /// Aggregate counters and elapsed time
    fn draw_stats(&mut self, state: &DashboardState);

    /// Scrolling output tail
    fn draw_output(&mut self, state: &DashboardState);

    /// Block until the operator acknowledges the finished run
    fn await_ack(&mut self, state: &DashboardState);

    /// Give the terminal back
    fn restore(&mut self);
}

/// [`DashboardView`] drawn with indicatif bars on stderr
pub struct IndicatifView {
    multi: MultiProgress,
    workers: HashMap<String, ProgressBar>,
    stats: ProgressBar,
    tail: Vec<ProgressBar>,
}

impl IndicatifView {
    pub fn new(tail_lines: usize) -> Self {
        let multi = MultiProgress::new();

        let stats = multi.add(ProgressBar::new(0));
        stats.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold} [{bar:40.green/white}] {pos}/{len} ({percent}%) {msg}")
                .expect("Invalid progress template")
                .progress_chars("=> "),
        );
        stats.set_prefix("total");

        let line_style = ProgressStyle::default_spinner()
            .template("{msg}")
            .expect("Invalid progress template");
        let tail = (0..tail_lines.max(1))
            .map(|_| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(line_style.clone());
                bar
            })
            .collect();

        Self {
            multi,
            workers: HashMap::new(),
            stats,
            tail,
        }
    }

    fn worker_bar(&mut self, id: &str, total: u64) -> &ProgressBar {
        let multi = &self.multi;
        let stats = &self.stats;
        self.workers.entry(id.to_string()).or_insert_with(|| {
            let bar = multi.insert_before(stats, ProgressBar::new(total));
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix:>12} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)")
                    .expect("Invalid progress template")
                    .progress_chars("=> "),
            );
            bar.set_prefix(id.to_string());
            bar
        })
    }
}

impl DashboardView for IndicatifView {
    fn draw_progress(&mut self, state: &DashboardState) {
        for (id, progress) in state.workers() {
            let bar = self.worker_bar(id, progress.total);
            bar.set_length(progress.total);
            bar.set_position(progress.completed);
        }
    }

    fn draw_stats(&mut self, state: &DashboardState) {
        self.stats.set_length(state.seed_total());
        self.stats.set_position(state.aggregate());
        self.stats.set_message(format!(
            "| {:.1}s | {:.0} seeds/s | {} lines",
            state.elapsed().as_secs_f64(),
            state.rate(),
            format_number(state.output_lines()),
        ));
    }

    fn draw_output(&mut self, state: &DashboardState) {
        let mut lines = state.tail();
        for bar in &self.tail {
            match lines.next() {
                Some(line) => bar.set_message(format!("{} {}", style(&line.worker_id).dim(), line.line)),
                None => bar.set_message(String::new()),
            }
        }
    }

    fn await_ack(&mut self, state: &DashboardState) {
        let term = Term::stdout();
        if !term.is_term() {
            return;
        }
        self.stats.set_message(format!(
            "| {} {}",
            style(format!("done in {:.1}s.", state.elapsed().as_secs_f64())).green().bold(),
            style("Press any key to exit").dim()
        ));
        if let Err(e) = term.read_key() {
            debug!(error = %e, "Acknowledgement read failed");
        }
    }

    fn restore(&mut self) {
        for bar in self.workers.values() {
            bar.finish();
        }
        self.stats.finish();
        for bar in &self.tail {
            bar.finish();
        }
        let _ = Term::stderr().show_cursor();
    }
}
