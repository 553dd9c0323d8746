//! Dashboard model, independent of any terminal

use crate::channel::{OutputLine, ProgressMessage};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// Last known progress of one worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerProgress {
    pub completed: u64,
    pub total: u64,
}

impl WorkerProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Derived view of a run: per-worker counts, recent output, start time
#[derive(Debug, Clone)]
pub struct DashboardState {
    seed_total: u64,
    workers: BTreeMap<String, WorkerProgress>,
    tail: VecDeque<OutputLine>,
    tail_capacity: usize,
    output_lines: u64,
    started: Instant,
}

impl DashboardState {
    pub fn new(seed_total: u64, tail_capacity: usize) -> Self {
        let tail_capacity = tail_capacity.max(1);
        Self {
            seed_total,
            workers: BTreeMap::new(),
            tail: VecDeque::with_capacity(tail_capacity),
            tail_capacity,
            output_lines: 0,
            started: Instant::now(),
        }
    }

    /// Record a progress tick. Counts never go backwards.
    pub fn apply_progress(&mut self, msg: &ProgressMessage) {
        let entry = self.workers.entry(msg.worker_id.clone()).or_default();
        entry.total = msg.total;
        entry.completed = entry.completed.max(msg.completed).min(msg.total);
    }

    /// Append an output line, dropping the oldest once the tail is full
    pub fn push_output(&mut self, line: OutputLine) {
        if self.tail.len() == self.tail_capacity {
            self.tail.pop_front();
        }
        self.tail.push_back(line);
        self.output_lines += 1;
    }

    /// Sum of the last completed count of every worker
    pub fn aggregate(&self) -> u64 {
        self.workers.values().map(|w| w.completed).sum()
    }

    pub fn seed_total(&self) -> u64 {
        self.seed_total
    }

    /// All seeds resolved, judged by progress alone
    pub fn is_complete(&self) -> bool {
        self.aggregate() >= self.seed_total
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Resolved seeds per second since start
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.aggregate() as f64 / secs
        } else {
            0.0
        }
    }

    /// Workers in id order
    pub fn workers(&self) -> impl Iterator<Item = (&str, &WorkerProgress)> {
        self.workers.iter().map(|(id, p)| (id.as_str(), p))
    }

    pub fn worker(&self, id: &str) -> Option<&WorkerProgress> {
        self.workers.get(id)
    }

    /// Visible output lines, oldest first
    pub fn tail(&self) -> impl Iterator<Item = &OutputLine> {
        self.tail.iter()
    }

    /// Output lines received so far, including those scrolled away
    pub fn output_lines(&self) -> u64 {
        self.output_lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(id: &str, completed: u64, total: u64) -> ProgressMessage {
        ProgressMessage {
            worker_id: id.to_string(),
            completed,
            total,
        }
    }

    #[test]
    fn test_aggregate_triggers_completion_only_at_total() {
        let mut state = DashboardState::new(10, 5);

        state.apply_progress(&tick("scan_00", 3, 5));
        state.apply_progress(&tick("scan_01", 5, 5));
        assert_eq!(state.aggregate(), 8);
        assert!(!state.is_complete());

        state.apply_progress(&tick("scan_00", 5, 5));
        assert_eq!(state.aggregate(), 10);
        assert!(state.is_complete());
    }

    #[test]
    fn test_counts_never_regress() {
        let mut state = DashboardState::new(5, 5);
        state.apply_progress(&tick("scan_00", 4, 5));
        state.apply_progress(&tick("scan_00", 2, 5));
        assert_eq!(state.worker("scan_00").unwrap().completed, 4);

        state.apply_progress(&tick("scan_00", 9, 5));
        assert_eq!(state.worker("scan_00").unwrap().completed, 5);
        assert_eq!(state.worker("scan_00").unwrap().percent(), 100.0);
    }

    #[test]
    fn test_tail_drops_oldest() {
        let mut state = DashboardState::new(1, 3);
        for i in 0..5 {
            state.push_output(OutputLine {
                worker_id: "scan_00".into(),
                line: format!("line {}", i),
            });
        }

        let lines: Vec<&str> = state.tail().map(|l| l.line.as_str()).collect();
        assert_eq!(lines, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(state.output_lines(), 5);
    }
}
