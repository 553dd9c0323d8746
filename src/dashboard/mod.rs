//! Live dashboard consumer
//!
//! Polls both telemetry channels on a fixed interval, folds what it drains
//! into a [`DashboardState`] and redraws the three panes of a
//! [`DashboardView`].
//!
//! ```text
//! Init ──► Rendering ──(aggregate == seeds)──► AllDone ──► AwaitingAck ──► Restored
//!              │                                                             ▲
//!              └──────────(interrupt, or every worker gone)──────────────────┘
//! ```
//!
//! Completion is judged from progress, not process exit. On completion the
//! workers get a grace period to exit before the rest are killed.

mod state;
mod view;

pub use state::{DashboardState, WorkerProgress};
pub use view::{DashboardView, IndicatifView};

use crate::channel::TelemetryReceiver;
use crate::error::ChannelError;
use crate::orchestrator::{ConsumerReport, TelemetryConsumer, WorkerControl};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default redraw interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

/// Default time workers get to exit on their own once all seeds resolved
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Dashboard lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Rendering,
    AllDone,
    AwaitingAck,
    Restored,
}

/// Telemetry consumer that renders a live dashboard
pub struct Dashboard<V: DashboardView> {
    view: V,
    tail: usize,
    interval: Duration,
    grace: Duration,
    shutdown: Arc<AtomicBool>,
    phase: Phase,
}

impl Dashboard<IndicatifView> {
    /// Dashboard drawing to the terminal
    pub fn terminal(tail: usize) -> Self {
        Self::new(IndicatifView::new(tail), tail)
    }
}

impl<V: DashboardView> Dashboard<V> {
    pub fn new(view: V, tail: usize) -> Self {
        Self {
            view,
            tail,
            interval: DEFAULT_INTERVAL,
            grace: DEFAULT_GRACE,
            shutdown: Arc::new(AtomicBool::new(false)),
            phase: Phase::Init,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Stop rendering (without acknowledgement) once `flag` is raised
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Drain both channels into `state`.
    ///
    /// Returns `false` once the channels are disconnected and empty; the
    /// dashboard then keeps showing the last state it saw.
    fn drain(&self, rx: &TelemetryReceiver, state: &mut DashboardState) -> bool {
        let progress = match rx.drain_progress() {
            Ok(msgs) => {
                for msg in &msgs {
                    state.apply_progress(msg);
                }
                true
            }
            Err(ChannelError::Disconnected) => false,
            Err(e) => {
                warn!(error = %e, "Progress channel failed");
                false
            }
        };

        let output = match rx.drain_output() {
            Ok(lines) => {
                for line in lines {
                    state.push_output(line);
                }
                true
            }
            Err(ChannelError::Disconnected) => false,
            Err(e) => {
                warn!(error = %e, "Output channel failed");
                false
            }
        };

        progress || output
    }

    fn render(&mut self, state: &DashboardState) {
        self.view.draw_progress(state);
        self.view.draw_stats(state);
        self.view.draw_output(state);
    }
}

impl<V: DashboardView> TelemetryConsumer for Dashboard<V> {
    fn consume(
        &mut self,
        rx: &TelemetryReceiver,
        workers: &dyn WorkerControl,
        seed_total: u64,
    ) -> ConsumerReport {
        let mut state = DashboardState::new(seed_total, self.tail);
        let mut connected = true;
        let mut interrupted = false;
        self.phase = Phase::Rendering;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                interrupted = true;
                break;
            }

            if connected && !self.drain(rx, &mut state) {
                debug!("Telemetry channels closed, rendering last known state");
                connected = false;
            }
            self.render(&state);

            if state.is_complete() {
                self.phase = Phase::AllDone;
                break;
            }
            if !connected && workers.all_exited() {
                warn!(
                    completed = state.aggregate(),
                    seeds = seed_total,
                    "Every worker exited before all seeds resolved"
                );
                break;
            }

            thread::sleep(self.interval);
        }

        if self.phase == Phase::AllDone {
            info!(seeds = seed_total, "All seeds resolved, stopping workers");
            workers.terminate(self.grace);

            // Lines emitted after the last tick
            self.drain(rx, &mut state);
            self.render(&state);

            self.phase = Phase::AwaitingAck;
            self.view.await_ack(&state);
        }

        self.view.restore();
        self.phase = Phase::Restored;

        ConsumerReport {
            completed: state.aggregate(),
            output_lines: state.output_lines(),
            interrupted,
        }
    }
}
