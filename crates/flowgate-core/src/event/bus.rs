//! Engine event bus.
//!
//! Runners, the local host and the dispatcher all publish into one
//! `tokio::sync::broadcast` channel. Publishing never blocks and never
//! fails: with no subscribers the event is dropped, and a subscriber that
//! falls more than `capacity` events behind loses the oldest ones.

use flowgate_types::event::EngineEvent;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Events of one execution, ending with its completion or failure.
    pub fn watch(&self, execution_id: Uuid) -> ExecutionWatch {
        ExecutionWatch {
            execution_id,
            rx: self.sender.subscribe(),
            finished: false,
        }
    }

    pub fn publish(&self, event: EngineEvent) {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ExecutionWatch
// ---------------------------------------------------------------------------

/// Subscription filtered to a single execution.
pub struct ExecutionWatch {
    execution_id: Uuid,
    rx: broadcast::Receiver<EngineEvent>,
    finished: bool,
}

impl ExecutionWatch {
    /// Next event of the watched execution. `None` once the execution has
    /// completed or failed, or when the bus is gone.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(event) if event.execution_id() == Some(self.execution_id) => {
                    self.finished = matches!(
                        event,
                        EngineEvent::ExecutionCompleted { .. } | EngineEvent::ExecutionFailed { .. }
                    );
                    return Some(event);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(
                        execution_id = %self.execution_id,
                        missed,
                        "execution watch lagged; some events were dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claimed() -> EngineEvent {
        EngineEvent::QueueEntryClaimed {
            entry_id: Uuid::now_v7(),
            claim_count: 1,
        }
    }

    fn node_started(execution_id: Uuid, key: &str) -> EngineEvent {
        EngineEvent::NodeStarted {
            execution_id,
            node_id: Uuid::now_v7(),
            node_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_clones_publish_to_every_subscriber() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.clone().publish(claimed());

        assert!(matches!(rx1.recv().await.unwrap(), EngineEvent::QueueEntryClaimed { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), EngineEvent::QueueEntryClaimed { .. }));
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(0);
        bus.publish(claimed());
        assert!(format!("{bus:?}").contains("subscribers: 0"));
    }

    #[tokio::test]
    async fn test_watch_filters_and_stops_at_terminal_event() {
        let bus = EventBus::default();
        let watched = Uuid::now_v7();
        let other = Uuid::now_v7();
        let mut watch = bus.watch(watched);

        bus.publish(claimed());
        bus.publish(node_started(other, "noise"));
        bus.publish(node_started(watched, "fetch"));
        bus.publish(EngineEvent::ExecutionFailed {
            execution_id: watched,
            error: "boom".to_string(),
        });
        bus.publish(node_started(watched, "late"));

        match watch.next().await {
            Some(EngineEvent::NodeStarted { node_key, .. }) => assert_eq!(node_key, "fetch"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(watch.next().await, Some(EngineEvent::ExecutionFailed { .. })));
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_ends_when_bus_dropped() {
        let bus = EventBus::new(4);
        let mut watch = bus.watch(Uuid::now_v7());
        drop(bus);
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_watch_survives_lag() {
        let bus = EventBus::new(2);
        let watched = Uuid::now_v7();
        let mut watch = bus.watch(watched);

        for _ in 0..5 {
            bus.publish(claimed());
        }
        bus.publish(EngineEvent::ExecutionCompleted {
            execution_id: watched,
            duration_ms: 3,
        });

        assert!(matches!(watch.next().await, Some(EngineEvent::ExecutionCompleted { .. })));
    }
}
