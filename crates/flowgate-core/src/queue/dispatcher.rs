//! Execution queue dispatcher: claim, hand off, recover.
//!
//! Any number of dispatchers may poll the same queue. Claiming is delegated
//! to `ExecutionQueueRepository::claim_pending`, whose skip-locked selection
//! is the only concurrency control; the dispatcher itself holds no locks.
//!
//! A row claimed by a dispatcher that dies before dispatching stays
//! `claimed` until the stale sweep (`recover_stale`) resets it to `pending`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowgate_types::config::DispatcherConfig;
use flowgate_types::error::RepositoryError;
use flowgate_types::event::EngineEvent;
use flowgate_types::output::TriggerContext;
use flowgate_types::queue::{ExecutionQueueEntry, QueueStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::queue::ExecutionQueueRepository;
use crate::workflow::host::ExecutionHost;

/// Upper bound on rows reset by one stale sweep.
const STALE_SWEEP_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// Error / report
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("queue repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// What one claim-and-dispatch pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    pub dispatched: usize,
    /// Rows the host refused; permanent refusals are marked failed, the rest
    /// are left for the stale sweep.
    pub failed_to_start: usize,
    /// Rows whose status update failed after the host answered. They stay
    /// `claimed` until the stale sweep.
    pub update_failed: usize,
}

// ---------------------------------------------------------------------------
// ExecutionQueueDispatcher
// ---------------------------------------------------------------------------

pub struct ExecutionQueueDispatcher<Q: ExecutionQueueRepository, H: ExecutionHost> {
    queue: Arc<Q>,
    host: Arc<H>,
    config: DispatcherConfig,
    event_bus: EventBus,
}

impl<Q: ExecutionQueueRepository, H: ExecutionHost> ExecutionQueueDispatcher<Q, H> {
    pub fn new(
        queue: Arc<Q>,
        host: Arc<H>,
        config: DispatcherConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            queue,
            host,
            config,
            event_bus,
        }
    }

    /// Enqueue a run request for a published definition version.
    pub async fn submit(
        &self,
        workspace_id: Uuid,
        definition_version_id: Uuid,
        trigger: TriggerContext,
    ) -> Result<ExecutionQueueEntry, DispatchError> {
        let entry = ExecutionQueueEntry::new(workspace_id, definition_version_id, trigger);
        self.queue.enqueue(&entry).await?;
        tracing::info!(
            entry_id = %entry.id,
            definition_version_id = %definition_version_id,
            trigger = entry.trigger.source(),
            "run request enqueued"
        );
        Ok(entry)
    }

    /// Claim up to `batch_size` pending rows.
    pub async fn claim_batch(&self) -> Result<Vec<ExecutionQueueEntry>, DispatchError> {
        let claimed = self.queue.claim_pending(self.config.batch_size).await?;
        for entry in &claimed {
            self.event_bus.publish(EngineEvent::QueueEntryClaimed {
                entry_id: entry.id,
                claim_count: entry.claim_count,
            });
        }
        if !claimed.is_empty() {
            tracing::debug!(batch = claimed.len(), "claimed queue entries");
        }
        Ok(claimed)
    }

    /// Claim a batch and hand every row to the host.
    ///
    /// Only a failed claim is an error. A row whose status update fails is
    /// logged and counted in `update_failed`; the rest of the batch still
    /// runs.
    pub async fn dispatch_batch(&self) -> Result<DispatchReport, DispatchError> {
        let claimed = self.claim_batch().await?;
        let mut report = DispatchReport {
            claimed: claimed.len(),
            ..Default::default()
        };

        for entry in &claimed {
            match self.host.start(entry).await {
                Ok(execution_id) => {
                    report.dispatched += 1;
                    if let Err(e) = self.mark_dispatched(entry, execution_id).await {
                        tracing::warn!(
                            entry_id = %entry.id,
                            execution_id = %execution_id,
                            error = %e,
                            "run started but queue entry was not marked dispatched"
                        );
                        report.update_failed += 1;
                    }
                }
                Err(e) if e.is_permanent() => {
                    tracing::warn!(
                        entry_id = %entry.id,
                        error = %e,
                        "run cannot start; failing queue entry"
                    );
                    report.failed_to_start += 1;
                    let reason = e.to_string();
                    if let Err(e) = self
                        .queue
                        .mark_terminal(&entry.id, QueueStatus::Failed, None, Some(&reason))
                        .await
                    {
                        tracing::warn!(
                            entry_id = %entry.id,
                            error = %e,
                            "failed to mark queue entry failed"
                        );
                        report.update_failed += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        entry_id = %entry.id,
                        error = %e,
                        "execution host did not start run; leaving entry for the stale sweep"
                    );
                    report.failed_to_start += 1;
                }
            }
        }

        if report.claimed > 0 {
            tracing::info!(
                claimed = report.claimed,
                dispatched = report.dispatched,
                failed_to_start = report.failed_to_start,
                update_failed = report.update_failed,
                "dispatch pass finished"
            );
        }
        Ok(report)
    }

    async fn mark_dispatched(
        &self,
        entry: &ExecutionQueueEntry,
        execution_id: Uuid,
    ) -> Result<(), DispatchError> {
        match self.queue.mark_dispatched(&entry.id, &execution_id).await {
            Ok(()) => {}
            // The run already finished and settled the row.
            Err(RepositoryError::Conflict(reason)) => {
                tracing::debug!(
                    entry_id = %entry.id,
                    reason = %reason,
                    "queue entry already settled"
                );
            }
            Err(e) => return Err(e.into()),
        }
        self.event_bus.publish(EngineEvent::QueueEntryDispatched {
            entry_id: entry.id,
            execution_id,
        });
        Ok(())
    }

    /// Reset rows claimed longer than `stale_after_secs` ago to `pending`.
    /// A threshold reaching back past the earliest representable time
    /// skips the sweep.
    pub async fn recover_stale(&self) -> Result<Vec<Uuid>, DispatchError> {
        let cutoff = i64::try_from(self.config.stale_after_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|stale_after| Utc::now().checked_sub_signed(stale_after));
        let Some(cutoff) = cutoff else {
            tracing::warn!(
                stale_after_secs = self.config.stale_after_secs,
                "stale threshold out of range; skipping sweep"
            );
            return Ok(Vec::new());
        };
        let reset = self.queue.reclaim_stale(cutoff, STALE_SWEEP_LIMIT).await?;

        for entry_id in &reset {
            self.event_bus.publish(EngineEvent::QueueEntryReclaimed {
                entry_id: *entry_id,
            });
        }
        if !reset.is_empty() {
            tracing::warn!(count = reset.len(), "reset stale queue claims to pending");
        }
        Ok(reset)
    }

    /// Poll and sweep until `shutdown` is cancelled. Repository errors are
    /// logged and retried on the next tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut poll = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        let mut sweep =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval_ms,
            stale_after_secs = self.config.stale_after_secs,
            "dispatcher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sweep.tick() => {
                    if let Err(e) = self.recover_stale().await {
                        tracing::warn!(error = %e, "stale sweep failed");
                    }
                }
                _ = poll.tick() => {
                    if let Err(e) = self.dispatch_batch().await {
                        tracing::warn!(error = %e, "dispatch pass failed");
                    }
                }
            }
        }

        tracing::info!("dispatcher stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
