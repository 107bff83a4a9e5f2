//! Periodic progress logging against the writer's atomic counter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

const DEFAULT_PERIOD: Duration = Duration::from_secs(5);

/// Reads the shared completed-task counter on a fixed tick and logs
/// completed, remaining, and percentage against the estimate. Exits
/// when the counter reaches the estimate or the run is cancelled.
pub struct ProgressReporter {
    completed: Arc<AtomicU64>,
    total: u64,
    period: Duration,
}

impl ProgressReporter {
    pub fn new(completed: Arc<AtomicU64>, total: u64) -> Self {
        Self {
            completed,
            total,
            period: DEFAULT_PERIOD,
        }
    }

    /// Override the tick period (tests).
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub async fn run(self, cancel: CancellationToken) {
        if self.total == 0 {
            return;
        }
        let mut ticker = tokio::time::interval(self.period);
        // The first tick fires immediately; skip it so the first report
        // lands one full period in.
        ticker.tick().await;

        let mut last_logged = 0u64;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let done = self.completed.load(Ordering::Relaxed);
                    if done == last_logged {
                        continue;
                    }
                    last_logged = done;
                    let remaining = self.total.saturating_sub(done);
                    let percent = done as f64 / self.total as f64 * 100.0;
                    info!(
                        total_tasks = self.total,
                        completed_tasks = done,
                        remaining_tasks = remaining,
                        percent = format!("{percent:.2}"),
                        "progress"
                    );
                    if done >= self.total {
                        return;
                    }
                }
            }
        }
    }
}
