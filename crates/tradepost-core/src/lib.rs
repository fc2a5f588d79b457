pub mod auth;
pub mod convkey;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod presence;
pub mod rooms;

use std::sync::Arc;

use tradepost_db::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub event_bus: events::EventBus,
    /// Source of truth for "is this user reachable right now".
    pub presence: Arc<presence::PresenceRegistry>,
    /// Conversation-room membership and broadcast scoping.
    pub rooms: Arc<rooms::RoomRouter>,
    pub config: AppConfig,
}

impl AppState {
    /// Wire the shared components around one event bus. Presence and rooms
    /// are owned here and injected everywhere else; sessions are the only
    /// writers.
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let event_bus = events::EventBus::default();
        let rooms = Arc::new(rooms::RoomRouter::new(event_bus.clone()));
        Self {
            db,
            event_bus,
            presence: Arc::new(presence::PresenceRegistry::new()),
            rooms,
            config,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// When set, both the gateway identify frame and API requests must carry
    /// a token signed with this secret whose subject matches the claimed
    /// user id. When unset the bare id is trusted (single-tenant dev mode).
    pub jwt_secret: Option<String>,
}
