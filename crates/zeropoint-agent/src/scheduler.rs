//! Timer-driven reconciliation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use zeropoint_core::ReconcileResult;
use zeropoint_reconcile::Executor;

/// Periodically asks the executor to reconcile.
pub struct Scheduler {
    executor: Executor,
    period: Duration,
}

impl Scheduler {
    pub fn new(executor: Executor, period: Duration) -> Self {
        Self { executor, period }
    }

    /// Run the scheduler's main loop. Never returns.
    pub async fn run(self: Arc<Self>) {
        info!("⏱️  Scheduler started (every {}s)", self.period.as_secs());

        let mut ticker = interval(self.period);
        // A run longer than the period must not cause a burst of catch-up ticks.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut tick: u64 = 0;
        loop {
            ticker.tick().await;
            tick += 1;
            self.tick(tick).await;
        }
    }

    async fn tick(&self, n: u64) -> ReconcileResult {
        let response = self.executor.reconcile(Some(format!("timer-{n}"))).await;
        match response.result {
            ReconcileResult::Failed => {
                if let Some(error) = &response.error {
                    warn!("Scheduled reconcile failed at {error}");
                }
            }
            ReconcileResult::Blocked => {
                info!(
                    pending = ?response.pending_resources,
                    "Scheduled reconcile blocked: {}",
                    response.reason.map(|r| r.as_str()).unwrap_or("unknown")
                );
            }
            _ => {}
        }
        response.result
    }
}
