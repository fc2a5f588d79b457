use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tradepost_models::presence::{OnlineUser, PresenceStatus};
use uuid::Uuid;

/// Transient per-user presence. The handle is cleared when the user goes
/// offline; `last_seen` survives for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct PresenceRecord {
    pub connection_id: Option<Uuid>,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct PresenceSnapshot {
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

/// In-memory registry of live connections; the single source of truth for
/// "is this user reachable right now". One authoritative connection per
/// user: a newer connection for the same user supersedes the old mapping.
#[derive(Default)]
pub struct PresenceRegistry {
    users: DashMap<String, PresenceRecord>,
    connections: DashMap<Uuid, String>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection as the user's authoritative handle. Returns the
    /// superseded connection id when the user was already online, so the
    /// caller can evict the stale session explicitly. The superseded
    /// connection is forgotten here; its eventual disconnect is a no-op.
    pub fn connect(&self, user_id: &str, connection_id: Uuid) -> Option<Uuid> {
        let previous = self.users.insert(
            user_id.to_string(),
            PresenceRecord {
                connection_id: Some(connection_id),
                status: PresenceStatus::Online,
                last_seen: Utc::now(),
            },
        );
        self.connections.insert(connection_id, user_id.to_string());

        let superseded = previous
            .and_then(|record| record.connection_id)
            .filter(|old| *old != connection_id);
        if let Some(old) = superseded {
            self.connections.remove(&old);
        }
        superseded
    }

    /// Flip the owning user offline. Returns the user only when the
    /// connection was still authoritative; a superseded connection
    /// disconnecting later must not take the re-connected user offline.
    pub fn disconnect(&self, connection_id: Uuid) -> Option<String> {
        let (_, user_id) = self.connections.remove(&connection_id)?;
        let mut record = self.users.get_mut(&user_id)?;
        if record.connection_id != Some(connection_id) {
            return None;
        }
        record.connection_id = None;
        record.status = PresenceStatus::Offline;
        record.last_seen = Utc::now();
        drop(record);
        Some(user_id)
    }

    pub fn status(&self, user_id: &str) -> PresenceSnapshot {
        match self.users.get(user_id) {
            Some(record) => PresenceSnapshot {
                status: record.status,
                last_seen: Some(record.last_seen),
            },
            None => PresenceSnapshot {
                status: PresenceStatus::Offline,
                last_seen: None,
            },
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users
            .get(user_id)
            .is_some_and(|record| record.status == PresenceStatus::Online)
    }

    pub fn list_online(&self) -> Vec<OnlineUser> {
        self.users
            .iter()
            .filter(|entry| entry.status == PresenceStatus::Online)
            .map(|entry| OnlineUser {
                user_id: entry.key().clone(),
                last_seen: entry.last_seen,
            })
            .collect()
    }
}
