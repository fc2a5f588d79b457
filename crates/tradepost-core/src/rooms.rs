use std::collections::HashSet;

use dashmap::DashMap;
use tradepost_models::gateway::ServerEvent;
use uuid::Uuid;

use crate::events::EventBus;

/// Broadcast-scope bookkeeping: which connections are joined to which
/// conversation's live stream. Keyed by conversation, not by user, since a
/// user may hold several joined connections. Nothing here is persisted.
pub struct RoomRouter {
    bus: EventBus,
    rooms: DashMap<String, HashSet<Uuid>>,
    joined: DashMap<Uuid, HashSet<String>>,
}

impl RoomRouter {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            rooms: DashMap::new(),
            joined: DashMap::new(),
        }
    }

    pub fn join(&self, user_id: &str, key: &str, connection_id: Uuid) {
        self.rooms
            .entry(key.to_string())
            .or_default()
            .insert(connection_id);
        self.joined
            .entry(connection_id)
            .or_default()
            .insert(key.to_string());
        tracing::debug!(user_id, key, %connection_id, "joined conversation room");
    }

    pub fn leave(&self, user_id: &str, key: &str, connection_id: Uuid) {
        if let Some(mut members) = self.rooms.get_mut(key) {
            members.remove(&connection_id);
            if members.is_empty() {
                drop(members);
                self.rooms.remove_if(key, |_, members| members.is_empty());
            }
        }
        if let Some(mut keys) = self.joined.get_mut(&connection_id) {
            keys.remove(key);
        }
        tracing::debug!(user_id, key, %connection_id, "left conversation room");
    }

    /// Disconnect cleanup: drop every membership held by the connection.
    pub fn remove_connection(&self, connection_id: Uuid) {
        let Some((_, keys)) = self.joined.remove(&connection_id) else {
            return;
        };
        for key in keys {
            if let Some(mut members) = self.rooms.get_mut(&key) {
                members.remove(&connection_id);
                if members.is_empty() {
                    drop(members);
                    self.rooms.remove_if(&key, |_, members| members.is_empty());
                }
            }
        }
    }

    pub fn is_member(&self, key: &str, connection_id: Uuid) -> bool {
        self.rooms
            .get(key)
            .is_some_and(|members| members.contains(&connection_id))
    }

    /// Deliver to every connection currently joined to the room.
    pub fn broadcast(&self, key: &str, event: ServerEvent) {
        self.bus.dispatch_room(key, event);
    }

    /// Deliver to the room minus the originating connection; used for
    /// ephemeral signals (typing) that must not echo back.
    pub fn broadcast_except(&self, key: &str, except: Uuid, event: ServerEvent) {
        self.bus.dispatch_room_except(key, except, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_tracks_join_leave_and_disconnect() {
        let router = RoomRouter::new(EventBus::default());
        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();

        router.join("alice", "alice_bob", conn_a);
        router.join("bob", "alice_bob", conn_b);
        router.join("alice", "alice_carol", conn_a);
        assert!(router.is_member("alice_bob", conn_a));
        assert!(router.is_member("alice_bob", conn_b));

        router.leave("alice", "alice_bob", conn_a);
        assert!(!router.is_member("alice_bob", conn_a));
        assert!(router.is_member("alice_bob", conn_b));

        // Abrupt disconnect drops every remaining membership at once.
        router.remove_connection(conn_a);
        assert!(!router.is_member("alice_carol", conn_a));
        router.remove_connection(conn_b);
        assert!(!router.is_member("alice_bob", conn_b));
    }

    #[tokio::test]
    async fn broadcast_rides_the_event_bus_with_room_scope() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let router = RoomRouter::new(bus);
        let conn = Uuid::new_v4();

        router.broadcast(
            "alice_bob",
            ServerEvent::TypingIndicator {
                key: "alice_bob".into(),
                user_id: "alice".into(),
                is_typing: true,
            },
        );
        let routed = rx.recv().await.expect("event");
        assert_eq!(
            routed.scope,
            crate::events::EventScope::Room("alice_bob".into())
        );
        assert!(routed.except.is_none());

        router.broadcast_except(
            "alice_bob",
            conn,
            ServerEvent::TypingIndicator {
                key: "alice_bob".into(),
                user_id: "alice".into(),
                is_typing: false,
            },
        );
        let routed = rx.recv().await.expect("event");
        assert_eq!(routed.except, Some(conn));
    }
}
