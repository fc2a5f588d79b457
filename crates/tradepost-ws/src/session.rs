use std::collections::HashSet;

use tradepost_core::events::{EventScope, RoutedEvent};
use uuid::Uuid;

pub struct Session {
    pub user_id: String,
    pub connection_id: Uuid,
    /// Conversation keys this connection has joined; mirrors the central
    /// room router and is the delivery filter for room-scoped events.
    pub joined: HashSet<String>,
}

impl Session {
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            connection_id: Uuid::new_v4(),
            joined: HashSet::new(),
        }
    }

    pub fn should_receive_event(&self, event: &RoutedEvent) -> bool {
        if event.except == Some(self.connection_id) {
            return false;
        }
        match &event.scope {
            EventScope::Room(key) => self.joined.contains(key),
            EventScope::User(user_id) => *user_id == self.user_id,
            EventScope::Connection(connection_id) => *connection_id == self.connection_id,
            EventScope::Global => true,
        }
    }
}
