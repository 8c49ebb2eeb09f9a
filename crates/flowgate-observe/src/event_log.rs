//! Engine event logging.
//!
//! Turns `EngineEvent`s from the event bus into structured tracing records.
//! Lifecycle events log at `info`, per-node progress at `debug`, failures
//! and reclaims at `warn`.

use flowgate_types::event::EngineEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub fn log_engine_event(event: &EngineEvent) {
    match event {
        EngineEvent::ExecutionStarted {
            execution_id,
            definition_version_id,
            workspace_id,
        } => tracing::info!(
            execution_id = %execution_id,
            definition_version_id = %definition_version_id,
            workspace_id = %workspace_id,
            "execution started"
        ),
        EngineEvent::ExecutionCompleted {
            execution_id,
            duration_ms,
        } => tracing::info!(execution_id = %execution_id, duration_ms, "execution completed"),
        EngineEvent::ExecutionFailed { execution_id, error } => {
            tracing::warn!(execution_id = %execution_id, error = %error, "execution failed")
        }
        EngineEvent::NodeStarted {
            execution_id,
            node_key,
            ..
        } => tracing::debug!(execution_id = %execution_id, node_key = %node_key, "node started"),
        EngineEvent::NodeCompleted {
            execution_id,
            node_key,
            duration_ms,
            ..
        } => tracing::debug!(
            execution_id = %execution_id,
            node_key = %node_key,
            duration_ms,
            "node completed"
        ),
        EngineEvent::NodeSkipped {
            execution_id,
            node_key,
            reason,
            ..
        } => tracing::info!(
            execution_id = %execution_id,
            node_key = %node_key,
            reason = %reason,
            "node skipped"
        ),
        EngineEvent::NodeFailed {
            execution_id,
            node_key,
            error,
            ..
        } => tracing::warn!(
            execution_id = %execution_id,
            node_key = %node_key,
            error = %error,
            "node failed"
        ),
        EngineEvent::QueueEntryClaimed {
            entry_id,
            claim_count,
        } => tracing::debug!(entry_id = %entry_id, claim_count, "queue entry claimed"),
        EngineEvent::QueueEntryDispatched {
            entry_id,
            execution_id,
        } => tracing::debug!(
            entry_id = %entry_id,
            execution_id = %execution_id,
            "queue entry dispatched"
        ),
        EngineEvent::QueueEntryReclaimed { entry_id } => {
            tracing::warn!(entry_id = %entry_id, "stale queue claim reset to pending")
        }
    }
}

/// Log every event from `rx` until the bus closes. A lagging receiver logs
/// how many events it missed and keeps going.
pub fn spawn_event_logger(mut rx: broadcast::Receiver<EngineEvent>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut logged = 0u64;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    log_engine_event(&event);
                    logged += 1;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event logger lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        logged
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_logger_drains_until_closed() {
        let (tx, rx) = broadcast::channel(16);
        let handle = spawn_event_logger(rx);

        let execution_id = Uuid::now_v7();
        tx.send(EngineEvent::ExecutionCompleted {
            execution_id,
            duration_ms: 5,
        })
        .unwrap();
        tx.send(EngineEvent::QueueEntryReclaimed {
            entry_id: Uuid::now_v7(),
        })
        .unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_logger_survives_lag() {
        let (tx, rx) = broadcast::channel(1);
        for _ in 0..3 {
            tx.send(EngineEvent::QueueEntryReclaimed {
                entry_id: Uuid::now_v7(),
            })
            .unwrap();
        }
        let handle = spawn_event_logger(rx);
        drop(tx);

        assert_eq!(handle.await.unwrap(), 1);
    }
}
