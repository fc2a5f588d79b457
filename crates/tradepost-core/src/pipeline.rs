use chrono::{DateTime, Utc};
use tradepost_db::conversations::{self, NewMessage};
use tradepost_db::notifications::{self, NewNotification};
use tradepost_models::gateway::ServerEvent;
use tradepost_models::message::MessageKind;
use tradepost_models::notification::{NotificationKind, NotificationPriority};

use crate::convkey;
use crate::error::CoreError;
use crate::AppState;

/// Upper bound on a message body, in characters.
pub const MAX_MESSAGE_CHARS: usize = 1000;
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub receiver: String,
    pub body: String,
    pub sender_display: String,
    pub receiver_display: String,
}

/// Closes the send transaction from the sender's point of view.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

fn validate(request: &SendRequest) -> Result<String, CoreError> {
    if request.receiver.is_empty() {
        return Err(CoreError::Validation("receiver is required".into()));
    }
    if request.sender_display.is_empty() {
        return Err(CoreError::Validation(
            "sender display name is required".into(),
        ));
    }
    if request.receiver_display.is_empty() {
        return Err(CoreError::Validation(
            "receiver display name is required".into(),
        ));
    }
    let body = request.body.trim();
    if body.is_empty() {
        return Err(CoreError::Validation("message cannot be empty".into()));
    }
    if body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(CoreError::Validation(format!(
            "message too long (max {MAX_MESSAGE_CHARS} characters)"
        )));
    }
    Ok(body.to_string())
}

fn preview(body: &str) -> String {
    let mut out: String = body.chars().take(PREVIEW_CHARS).collect();
    if body.chars().nth(PREVIEW_CHARS).is_some() {
        out.push_str("...");
    }
    out
}

/// Run one message send end to end: validate, persist, fan out to the
/// conversation room, push a live notification when the receiver is
/// reachable, and append the durable notification record. The sender
/// identity comes from the authenticated session, never from the payload.
pub async fn send_message(
    state: &AppState,
    sender_id: &str,
    request: SendRequest,
) -> Result<SendReceipt, CoreError> {
    let body = validate(&request)?;
    let key = convkey::conversation_key(sender_id, &request.receiver);

    // A store failure here aborts the whole send: nothing may be broadcast
    // that is not durably persisted.
    let message = conversations::append(
        &state.db,
        &key,
        NewMessage {
            sender_id: sender_id.to_string(),
            receiver_id: request.receiver.clone(),
            sender_display: request.sender_display.clone(),
            receiver_display: request.receiver_display.clone(),
            body,
            kind: MessageKind::Text,
        },
    )
    .await
    .map_err(|err| {
        tracing::error!(key, sender_id, error = %err, "message append failed");
        CoreError::Database(err)
    })?;

    state.rooms.broadcast(
        &key,
        ServerEvent::MessageDelivered {
            message_id: message.id.clone(),
            key: key.clone(),
            sender: message.sender_id.clone(),
            receiver: message.receiver_id.clone(),
            sender_display: message.sender_display.clone(),
            receiver_display: message.receiver_display.clone(),
            body: message.body.clone(),
            kind: message.kind,
            timestamp: message.created_at,
        },
    );

    // Reachability is independent of room membership: an online receiver
    // gets a direct push even with the conversation closed.
    if state.presence.is_online(&request.receiver) {
        state.event_bus.dispatch_user(
            &request.receiver,
            ServerEvent::LiveNotification {
                key: key.clone(),
                from_user: sender_id.to_string(),
                from_user_display: message.sender_display.clone(),
                body: message.body.clone(),
                message_id: message.id.clone(),
                timestamp: message.created_at,
            },
        );
    } else {
        tracing::debug!(key, receiver = %request.receiver, "receiver offline, no live push");
    }

    // The durable record is written regardless of the live-push outcome; a
    // failure here degrades catch-up delivery but never undoes the message.
    let stored = notifications::append(
        &state.db,
        &key,
        NewNotification {
            to_user: request.receiver.clone(),
            from_user: sender_id.to_string(),
            body: format!(
                "New message from {}: {}",
                message.sender_display,
                preview(&message.body)
            ),
            kind: NotificationKind::Chat,
            message_id: Some(message.id.clone()),
            preview: Some(preview(&message.body)),
            priority: NotificationPriority::Medium,
        },
    )
    .await;
    if let Err(err) = stored {
        tracing::warn!(key, error = %err, "notification append failed after message persisted");
    }

    Ok(SendReceipt {
        message_id: message.id,
        key,
        timestamp: message.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventScope;
    use crate::AppConfig;
    use tokio::sync::broadcast::error::TryRecvError;
    use uuid::Uuid;

    async fn test_state() -> AppState {
        let db = tradepost_db::create_pool("sqlite::memory:", 1)
            .await
            .expect("pool");
        tradepost_db::run_migrations(&db).await.expect("migrations");
        AppState::new(db, AppConfig { jwt_secret: None })
    }

    fn request(receiver: &str, body: &str) -> SendRequest {
        SendRequest {
            receiver: receiver.to_string(),
            body: body.to_string(),
            sender_display: "Alice".to_string(),
            receiver_display: "Bob".to_string(),
        }
    }

    async fn message_count(state: &AppState) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&state.db)
            .await
            .unwrap()
    }

    async fn notification_count(state: &AppState) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications")
            .fetch_one(&state.db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn send_to_offline_receiver_persists_both_logs_without_live_push() {
        let state = test_state().await;
        let mut rx = state.event_bus.subscribe();

        let receipt = send_message(&state, "alice", request("bob", "hi"))
            .await
            .expect("send");
        assert_eq!(receipt.key, "alice_bob");

        // Exactly one room fan-out, no user-scoped push.
        let routed = rx.try_recv().expect("room event");
        assert_eq!(routed.scope, EventScope::Room("alice_bob".into()));
        assert!(matches!(
            routed.event,
            ServerEvent::MessageDelivered { .. }
        ));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        assert_eq!(message_count(&state).await, 1);
        assert_eq!(notification_count(&state).await, 1);

        let unread = tradepost_db::notifications::list_unread_for_user(&state.db, "bob")
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].message_id.as_deref(), Some(receipt.message_id.as_str()));
    }

    #[tokio::test]
    async fn offline_receiver_catches_up_through_the_notification_log() {
        let state = test_state().await;
        send_message(&state, "alice", request("bob", "hi"))
            .await
            .expect("send");

        // Bob connects later: the unread listing carries the missed send.
        let unread = tradepost_db::notifications::list_unread_for_user(&state.db, "bob")
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].conversation_key, "alice_bob");

        tradepost_db::notifications::mark_all_read(&state.db, "alice_bob", "bob")
            .await
            .unwrap();
        let stats = tradepost_db::notifications::stats(&state.db, "bob")
            .await
            .unwrap();
        assert_eq!(stats.unread, 0);
        assert_eq!(stats.read, 1);
    }

    #[tokio::test]
    async fn send_to_online_receiver_also_fires_a_live_push() {
        let state = test_state().await;
        state.presence.connect("bob", Uuid::new_v4());
        let mut rx = state.event_bus.subscribe();

        send_message(&state, "alice", request("bob", "are you there?"))
            .await
            .expect("send");

        // Room delivery is published before the live push.
        let first = rx.try_recv().expect("room event");
        let ServerEvent::MessageDelivered { body: delivered, .. } = first.event else {
            panic!("expected messageDelivered first");
        };
        let second = rx.try_recv().expect("live push");
        assert_eq!(second.scope, EventScope::User("bob".into()));
        let ServerEvent::LiveNotification { body: pushed, .. } = second.event else {
            panic!("expected liveNotification second");
        };
        assert_eq!(delivered, pushed);

        // The durable record is written even though the push already landed.
        assert_eq!(notification_count(&state).await, 1);
    }

    #[tokio::test]
    async fn oversize_body_is_rejected_before_any_write() {
        let state = test_state().await;
        let mut rx = state.event_bus.subscribe();

        let err = send_message(&state, "alice", request("bob", &"x".repeat(1001)))
            .await
            .expect_err("must reject");
        assert!(matches!(err, CoreError::Validation(_)));

        assert_eq!(message_count(&state).await, 0);
        assert_eq!(notification_count(&state).await, 0);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn bodies_at_the_limit_still_pass() {
        let state = test_state().await;
        send_message(&state, "alice", request("bob", &"x".repeat(1000)))
            .await
            .expect("exactly at the limit is fine");
    }

    #[tokio::test]
    async fn missing_fields_name_the_field() {
        let state = test_state().await;

        let err = send_message(&state, "alice", request("", "hi"))
            .await
            .expect_err("no receiver");
        assert!(err.to_string().contains("receiver"));

        let err = send_message(&state, "alice", request("bob", "   "))
            .await
            .expect_err("blank body");
        assert!(err.to_string().contains("empty"));

        let mut req = request("bob", "hi");
        req.sender_display = String::new();
        let err = send_message(&state, "alice", req)
            .await
            .expect_err("no sender display");
        assert!(err.to_string().contains("sender display"));
    }
}
