//! Periodic queue maintenance.

use crate::queue::HostQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Shortest accepted tick period. `tokio::time::interval` rejects zero.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Ticks the host queue so blocked items are re-evaluated.
pub struct Maintainer {
    id: String,
    queue: Arc<HostQueue>,
    period: Duration,
}

impl Maintainer {
    /// Periods below [`MIN_PERIOD`] are raised to it.
    pub fn new(id: impl Into<String>, queue: Arc<HostQueue>, period: Duration) -> Self {
        let id = id.into();
        if period < MIN_PERIOD {
            warn!(maintainer = %id, ?period, "Maintenance period too short, using minimum");
        }
        Self {
            id,
            queue,
            period: period.max(MIN_PERIOD),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run the maintenance loop. Abort the task to stop it.
    pub async fn run(&self) {
        info!(
            maintainer = %self.id,
            period_ms = u64::try_from(self.period.as_millis()).unwrap_or(u64::MAX),
            "Starting queue maintenance"
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = self.queue.maintain();
            for started in &report.started {
                info!(maintainer = %self.id, run = %started.run, node = %started.node, "Dispatched");
            }
            if report.pending > 0 {
                debug!(
                    maintainer = %self.id,
                    pending = report.pending,
                    blocked = report.blocked.len(),
                    "Items still waiting"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::ThrottleGate;
    use crate::registry::{CategoryRegistry, SharedRegistry};
    use throttle_core::{Category, ExecutionUnit, Node, RunRef, ThrottleConfig};

    fn queue() -> Arc<HostQueue> {
        let registry = SharedRegistry::new(
            CategoryRegistry::new(vec![Category::new("ONE").with_max_total(1)]).unwrap(),
        );
        Arc::new(HostQueue::new(
            vec![Node::new("node-1", 2)],
            Arc::new(ThrottleGate::new(registry)),
        ))
    }

    fn unit(name: &str) -> ExecutionUnit {
        ExecutionUnit::new(RunRef::new(name, 1), ThrottleConfig::categories(["ONE"]))
    }

    #[tokio::test]
    async fn test_blocked_item_dispatched_after_release() {
        let queue = queue();

        queue.submit(unit("first"));
        queue.submit(unit("second"));

        let maintainer = Maintainer::new("test", Arc::clone(&queue), Duration::from_millis(5));
        let handle = tokio::spawn(async move { maintainer.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.pending().len(), 1);

        queue.complete(&RunRef::new("first", 1)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.is_empty());
        assert_eq!(
            queue.held_runs(&"node-1".into()),
            vec![RunRef::new("second", 1)]
        );

        handle.abort();
    }

    #[tokio::test]
    async fn test_zero_period_is_raised_to_minimum() {
        let queue = queue();
        queue.submit(unit("first"));

        let maintainer = Maintainer::new("zero", Arc::clone(&queue), Duration::ZERO);
        assert_eq!(maintainer.period(), MIN_PERIOD);

        let handle = tokio::spawn(async move { maintainer.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!handle.is_finished());
        assert!(queue.is_empty());
        handle.abort();
    }
}
