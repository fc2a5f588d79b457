use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::MessageKind;
use crate::presence::{OnlineUser, PresenceStatus};

/// Frames accepted from a client. Every variant carries a fixed field set;
/// unknown event names and unexpected fields are rejected during
/// deserialization rather than silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase",
    deny_unknown_fields
)]
pub enum ClientCommand {
    /// First frame of every connection. `token` is required when the server
    /// runs with a JWT secret configured.
    Identify {
        user_id: String,
        #[serde(default)]
        token: Option<String>,
    },
    JoinConversation {
        key: String,
    },
    LeaveConversation {
        key: String,
    },
    SendMessage {
        receiver: String,
        body: String,
        sender_display: String,
        receiver_display: String,
    },
    MarkMessageRead {
        message_id: String,
        key: String,
    },
    SetTyping {
        key: String,
        is_typing: bool,
    },
    QueryOnlineUsers,
}

/// Frames pushed to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Handshake accepted; the session is active.
    Ready {
        user_id: String,
        session_id: String,
    },
    ConversationJoined {
        key: String,
        timestamp: DateTime<Utc>,
    },
    ConversationLeft {
        key: String,
        timestamp: DateTime<Utc>,
    },
    /// A persisted message fanned out to the conversation room.
    MessageDelivered {
        message_id: String,
        key: String,
        sender: String,
        receiver: String,
        sender_display: String,
        receiver_display: String,
        body: String,
        kind: MessageKind,
        timestamp: DateTime<Utc>,
    },
    /// Best-effort push to a reachable recipient, independent of room
    /// membership. Carries the message id so clients can de-duplicate
    /// against `messageDelivered`.
    LiveNotification {
        key: String,
        from_user: String,
        from_user_display: String,
        body: String,
        message_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Closes the send transaction from the sender's point of view.
    SendAcknowledged {
        message_id: String,
        key: String,
        timestamp: DateTime<Utc>,
    },
    ReadReceipt {
        message_id: String,
        key: String,
        reader_id: String,
        timestamp: DateTime<Utc>,
    },
    TypingIndicator {
        key: String,
        user_id: String,
        is_typing: bool,
    },
    OnlineUsersList {
        users: Vec<OnlineUser>,
    },
    UserStatusChange {
        user_id: String,
        status: PresenceStatus,
        timestamp: DateTime<Utc>,
    },
    /// Sent to a connection that has been superseded by a newer connection
    /// for the same user; the server closes the socket right after.
    SessionReplaced,
    Error {
        message: String,
    },
}
