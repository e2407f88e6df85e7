//! Event system for engine operations
//!
//! Provides an event bus for notifying listeners about committed mutations and
//! recomputed aggregates. Useful for:
//! - Audit logging
//! - Outbound notifications (a sender subscribes to the bus)
//! - Cache invalidation in front-ends

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Events emitted by services
#[derive(Debug, Clone)]
pub enum EngineEvent {
    // Aggregation events
    MapRecomputed {
        map_id: String,
        progress: i32,
    },
    TerritoryRecomputed {
        territory_id: String,
        progress: i32,
    },
    RefreshFailed {
        target: String,
        error: String,
    },

    // Assignment events
    AssignmentCreated {
        assignment_id: String,
        map_id: String,
        publisher: String,
    },
    AssignmentsExpired {
        count: usize,
    },

    // Structure events
    MapCreated {
        map_id: String,
        territory_id: String,
        addresses: usize,
    },
    MapShapeChanged {
        map_id: String,
        change: &'static str,
        rows: usize,
    },
    MapReassigned {
        map_id: String,
        from_territory: String,
        to_territory: String,
    },
    StatusesReset {
        scope_id: String,
        count: usize,
    },
    CallRecorded {
        address_id: String,
        map_id: String,
        status: String,
    },

    // Option events
    OptionsUpdated {
        congregation_id: String,
        upserted: usize,
        deleted: usize,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &EngineEvent);
}

/// Event bus for broadcasting engine events
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: EngineEvent) {
        trace!(event = ?event, "Emitting engine event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::AssignmentCreated {
                assignment_id,
                map_id,
                publisher,
            } => {
                info!(assignment = %assignment_id, map = %map_id, publisher = %publisher, "Assignment created");
            }
            EngineEvent::MapCreated {
                map_id,
                territory_id,
                addresses,
            } => {
                info!(map = %map_id, territory = %territory_id, addresses, "Map created");
            }
            EngineEvent::MapShapeChanged { map_id, change, rows } => {
                debug!(map = %map_id, change, rows, "Map shape changed");
            }
            EngineEvent::MapReassigned {
                map_id,
                from_territory,
                to_territory,
            } => {
                info!(map = %map_id, from = %from_territory, to = %to_territory, "Map reassigned");
            }
            EngineEvent::RefreshFailed { target, error } => {
                warn!(target = %target, error = %error, "Aggregate refresh failed");
            }
            EngineEvent::AssignmentsExpired { count } => {
                debug!(count, "Expired assignments removed");
            }
            _ => {
                trace!(event = ?event, "Engine event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(EngineEvent::MapRecomputed {
            map_id: "map-1".into(),
            progress: 60,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            EngineEvent::MapRecomputed { map_id, progress } => {
                assert_eq!(map_id, "map-1");
                assert_eq!(progress, 60);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(EngineEvent::AssignmentsExpired { count: 0 });
    }
}
