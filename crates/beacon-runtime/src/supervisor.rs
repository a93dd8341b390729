//! Timeout supervisor.
//!
//! Sweeps the ledger on a fixed tick and turns every expired request into a
//! synthetic `TimedOut` envelope, merged exactly like a real result. A real
//! frame that wins the race simply makes the synthetic merge a no-op.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{FailureReason, ResultEnvelope};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::merge::{MergeEngine, MergeOutcome};

/// Periodic ledger sweeper.
#[derive(Debug, Clone)]
pub struct TimeoutSupervisor {
    merge: Arc<MergeEngine>,
    interval: Duration,
}

impl TimeoutSupervisor {
    /// Supervisor ticking every `interval`.
    pub fn new(merge: Arc<MergeEngine>, interval: Duration) -> Self {
        Self {
            merge,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Run one sweep now. Returns how many placeholders were timed out.
    pub fn sweep_once(&self) -> usize {
        let expired = self.merge.ledger().sweep_expired(Instant::now());
        let mut applied = 0;
        for request in expired {
            let envelope = ResultEnvelope::failure(
                request.correlation_id.clone(),
                FailureReason::timed_out(request.ttl),
            );
            match self.merge.merge(envelope) {
                Ok(MergeOutcome::Applied { .. }) => {
                    info!(correlation_id = %request.correlation_id, "pending request timed out");
                    applied += 1;
                }
                Ok(MergeOutcome::Orphaned { .. }) => {}
                Err(e) => debug!(error = %e, "timeout lost the race to a real result"),
            }
        }
        applied
    }

    /// Sweep until `cancel` fires.
    #[instrument(skip_all, fields(interval_ms = self.interval.as_millis()))]
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("timeout supervisor stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let _ = self.sweep_once();
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
