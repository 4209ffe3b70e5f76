//! Lifecycle Events
//!
//! A bounded broadcast channel of typed events. Subscribers pull at
//! their own pace; a lagging subscriber loses the oldest events (the
//! channel reports the lag) and can never block a producer.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default channel capacity before the oldest events are dropped
pub const EVENT_CAPACITY: usize = 256;

/// Engine lifecycle event
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    #[serde(rename = "memory:created")]
    Created { memory_id: String },
    #[serde(rename = "memory:updated")]
    Updated { memory_id: String },
    #[serde(rename = "memory:deleted")]
    Deleted { memory_id: String, hard: bool },
    #[serde(rename = "memory:pinned")]
    Pinned { memory_id: String },
    #[serde(rename = "memory:unpinned")]
    Unpinned { memory_id: String },
}

/// Bounded event bus
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event. With no subscribers this is a no-op.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe; events emitted before this call are not delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(EngineEvent::Created {
            memory_id: "mem_1".into(),
        });
        bus.emit(EngineEvent::Pinned {
            memory_id: "mem_1".into(),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::Created {
                memory_id: "mem_1".into()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::Pinned {
                memory_id: "mem_1".into()
            }
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.emit(EngineEvent::Deleted {
            memory_id: "mem_1".into(),
            hard: true,
        });
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.emit(EngineEvent::Created {
                memory_id: format!("mem_{i}"),
            });
        }

        // The first recv reports the lag instead of blocking the producer
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert!(missed >= 1),
            other => panic!("expected lag, got {other:?}"),
        }
    }

    #[test]
    fn test_event_wire_names() {
        let event = EngineEvent::Created {
            memory_id: "mem_1".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("memory:created"));
    }
}
