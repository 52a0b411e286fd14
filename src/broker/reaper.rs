use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::Broker;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requests_expired: usize,
    pub sessions_ended: usize,
    pub failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.requests_expired == 0 && self.sessions_ended == 0 && self.failures == 0
    }
}

/// Periodically expire whatever the in-process timers missed (restarts,
/// crashed callbacks). The first sweep runs immediately.
pub fn spawn_reaper(broker: Broker, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Elevation reaper running every {}s", every.as_secs());

        loop {
            ticker.tick().await;
            let report = broker.sweep_overdue().await;
            if report.is_empty() {
                tracing::trace!("Reaper sweep found nothing overdue");
            } else {
                tracing::info!(
                    "Reaper expired {} request(s), ended {} session(s), {} failure(s)",
                    report.requests_expired,
                    report.sessions_ended,
                    report.failures
                );
            }
        }
    })
}
