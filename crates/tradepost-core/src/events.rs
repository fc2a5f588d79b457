use tokio::sync::broadcast;
use tradepost_models::gateway::ServerEvent;
use uuid::Uuid;

/// Who a routed event is addressed to. Sessions filter on receipt; the bus
/// itself fans every event to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventScope {
    /// Every connection currently joined to the conversation's room.
    Room(String),
    /// Every live connection owned by the user, joined or not.
    User(String),
    /// One specific connection.
    Connection(Uuid),
    /// All connections.
    Global,
}

#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub scope: EventScope,
    /// Connection that must not receive the event (the originator of
    /// ephemeral signals like typing).
    pub except: Option<Uuid>,
    pub event: ServerEvent,
}

/// Broadcast-based event bus for real-time dispatch.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RoutedEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: RoutedEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutedEvent> {
        self.sender.subscribe()
    }

    pub fn dispatch_room(&self, key: &str, event: ServerEvent) {
        self.publish(RoutedEvent {
            scope: EventScope::Room(key.to_string()),
            except: None,
            event,
        });
    }

    pub fn dispatch_room_except(&self, key: &str, except: Uuid, event: ServerEvent) {
        self.publish(RoutedEvent {
            scope: EventScope::Room(key.to_string()),
            except: Some(except),
            event,
        });
    }

    pub fn dispatch_user(&self, user_id: &str, event: ServerEvent) {
        self.publish(RoutedEvent {
            scope: EventScope::User(user_id.to_string()),
            except: None,
            event,
        });
    }

    pub fn dispatch_connection(&self, connection_id: Uuid, event: ServerEvent) {
        self.publish(RoutedEvent {
            scope: EventScope::Connection(connection_id),
            except: None,
            event,
        });
    }

    /// Status fan-out to everyone but the connection that caused it.
    pub fn dispatch_global_except(&self, except: Uuid, event: ServerEvent) {
        self.publish(RoutedEvent {
            scope: EventScope::Global,
            except: Some(except),
            event,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}
