use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Duration;
use tradepost_core::error::CoreError;
use tradepost_core::events::RoutedEvent;
use tradepost_core::pipeline::{self, SendRequest};
use tradepost_core::{auth, AppState};
use tradepost_db::conversations;
use tradepost_db::DbError;
use tradepost_models::gateway::{ClientCommand, ServerEvent};
use tradepost_models::presence::PresenceStatus;

use crate::session::Session;

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(30);
const PING_INTERVAL: Duration = Duration::from_secs(20);

pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();
    serve_socket(sender, receiver, state).await;
}

/// Full connection lifecycle: identify handshake, active session loop,
/// disconnect bookkeeping. Generic over the socket halves so the state
/// machine can be driven without a real WebSocket.
pub(crate) async fn serve_socket(
    mut sender: impl SinkExt<Message> + Unpin,
    mut receiver: impl StreamExt<Item = Result<Message, axum::Error>> + Unpin,
    state: AppState,
) {
    let user_id = match tokio::time::timeout(
        IDENTIFY_TIMEOUT,
        wait_for_identify(&mut receiver, &state),
    )
    .await
    {
        Ok(Ok(user_id)) => user_id,
        Ok(Err(message)) => {
            reject(&mut sender, message).await;
            return;
        }
        Err(_) => {
            reject(&mut sender, "identify timed out".to_string()).await;
            return;
        }
    };

    let mut session = Session::new(user_id);
    tracing::info!(
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        "gateway connection authenticated"
    );

    // Subscribe before touching the registry so nothing published during
    // the transition can be missed.
    let event_rx = state.event_bus.subscribe();

    if let Some(superseded) = state
        .presence
        .connect(&session.user_id, session.connection_id)
    {
        tracing::info!(user_id = %session.user_id, old_connection = %superseded, "evicting superseded session");
        state
            .event_bus
            .dispatch_connection(superseded, ServerEvent::SessionReplaced);
    }
    state.event_bus.dispatch_global_except(
        session.connection_id,
        ServerEvent::UserStatusChange {
            user_id: session.user_id.clone(),
            status: PresenceStatus::Online,
            timestamp: Utc::now(),
        },
    );

    let ready = ServerEvent::Ready {
        user_id: session.user_id.clone(),
        session_id: session.connection_id.to_string(),
    };
    if send_event(&mut sender, &ready).await.is_ok() {
        run_session(&mut sender, &mut receiver, event_rx, &mut session, &state).await;
    }

    // Runs on every exit path; abrupt disconnects get the same cleanup as a
    // polite close.
    state.rooms.remove_connection(session.connection_id);
    if state.presence.disconnect(session.connection_id).is_some() {
        state.event_bus.dispatch_global_except(
            session.connection_id,
            ServerEvent::UserStatusChange {
                user_id: session.user_id.clone(),
                status: PresenceStatus::Offline,
                timestamp: Utc::now(),
            },
        );
    }
}

async fn wait_for_identify(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    state: &AppState,
) -> Result<String, String> {
    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(ClientCommand::Identify { user_id, token }) =
            serde_json::from_str::<ClientCommand>(&text)
        else {
            return Err("expected an identify frame".to_string());
        };

        let user_id = user_id.trim().to_string();
        if user_id.is_empty() {
            return Err("user id is required".to_string());
        }
        if let Some(secret) = &state.config.jwt_secret {
            let Some(token) = token else {
                return Err("authentication token required".to_string());
            };
            let claims =
                auth::validate_token(&token, secret).map_err(|_| "authentication failed".to_string())?;
            if claims.sub != user_id {
                return Err("authentication failed".to_string());
            }
        }
        return Ok(user_id);
    }
    Err("connection closed before identify".to_string())
}

async fn run_session(
    sender: &mut (impl SinkExt<Message> + Unpin),
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    mut event_rx: broadcast::Receiver<RoutedEvent>,
    session: &mut Session,
    state: &AppState,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(command) => {
                                if handle_command(command, sender, session, state).await.is_err() {
                                    break "websocket send error".to_string();
                                }
                            }
                            Err(err) => {
                                tracing::debug!(
                                    user_id = %session.user_id,
                                    error = %err,
                                    "rejected malformed client frame"
                                );
                                let event = error_event("unknown or malformed event");
                                if send_event(sender, &event).await.is_err() {
                                    break "websocket send error".to_string();
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!(
                                "client close frame (code={}, reason={})",
                                frame.code, frame.reason
                            ),
                            None => "client close frame".to_string(),
                        };
                    }
                    Some(Err(err)) => break format!("websocket receive error: {err}"),
                    None => break "websocket stream ended".to_string(),
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(routed) => {
                        if !session.should_receive_event(&routed) {
                            continue;
                        }
                        let replaced = matches!(routed.event, ServerEvent::SessionReplaced);
                        if send_event(sender, &routed.event).await.is_err() {
                            break "websocket send error".to_string();
                        }
                        if replaced {
                            let _ = sender
                                .send(Message::Close(Some(CloseFrame {
                                    code: 4000,
                                    reason: "session replaced by a newer connection".into(),
                                })))
                                .await;
                            break "superseded by a newer connection".to_string();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            user_id = %session.user_id,
                            skipped,
                            "event stream lagged; forcing reconnect"
                        );
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: 1013,
                                reason: "event stream fell behind; reconnect".into(),
                            })))
                            .await;
                        break format!("event stream lagged by {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break "event stream closed".to_string();
                    }
                }
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "websocket ping send error".to_string();
                }
            }
        }
    };
    tracing::info!(
        user_id = %session.user_id,
        reason = %disconnect_reason,
        "client disconnected"
    );
}

async fn handle_command(
    command: ClientCommand,
    sender: &mut (impl SinkExt<Message> + Unpin),
    session: &mut Session,
    state: &AppState,
) -> Result<(), ()> {
    match command {
        ClientCommand::Identify { .. } => {
            send_event(sender, &error_event("already identified")).await
        }
        ClientCommand::JoinConversation { key } => {
            let key = key.trim().to_string();
            if key.is_empty() {
                return send_event(sender, &error_event("conversation key is required")).await;
            }
            state
                .rooms
                .join(&session.user_id, &key, session.connection_id);
            session.joined.insert(key.clone());
            send_event(
                sender,
                &ServerEvent::ConversationJoined {
                    key,
                    timestamp: Utc::now(),
                },
            )
            .await
        }
        ClientCommand::LeaveConversation { key } => {
            let key = key.trim().to_string();
            if key.is_empty() {
                return send_event(sender, &error_event("conversation key is required")).await;
            }
            state
                .rooms
                .leave(&session.user_id, &key, session.connection_id);
            session.joined.remove(&key);
            send_event(
                sender,
                &ServerEvent::ConversationLeft {
                    key,
                    timestamp: Utc::now(),
                },
            )
            .await
        }
        ClientCommand::SendMessage {
            receiver,
            body,
            sender_display,
            receiver_display,
        } => {
            let request = SendRequest {
                receiver,
                body,
                sender_display,
                receiver_display,
            };
            match pipeline::send_message(state, &session.user_id, request).await {
                Ok(receipt) => {
                    send_event(
                        sender,
                        &ServerEvent::SendAcknowledged {
                            message_id: receipt.message_id,
                            key: receipt.key,
                            timestamp: receipt.timestamp,
                        },
                    )
                    .await
                }
                Err(CoreError::Validation(message)) => {
                    send_event(sender, &ServerEvent::Error { message }).await
                }
                Err(err) => {
                    // Storage details stay server-side; the client sees an
                    // opaque failure and may resend explicitly.
                    tracing::error!(user_id = %session.user_id, error = %err, "send pipeline failed");
                    send_event(sender, &error_event("failed to send message")).await
                }
            }
        }
        ClientCommand::MarkMessageRead { message_id, key } => {
            if message_id.trim().is_empty() || key.trim().is_empty() {
                return send_event(
                    sender,
                    &error_event("message id and conversation key are required"),
                )
                .await;
            }
            match conversations::mark_read(&state.db, &message_id, &session.user_id).await {
                Ok(read_at) => {
                    // The whole room sees the receipt, the marker included,
                    // so the sender's UI can confirm delivery.
                    state.rooms.broadcast(
                        &key,
                        ServerEvent::ReadReceipt {
                            message_id,
                            key: key.clone(),
                            reader_id: session.user_id.clone(),
                            timestamp: read_at,
                        },
                    );
                    Ok(())
                }
                Err(DbError::NotFound) => {
                    send_event(sender, &error_event("message not found")).await
                }
                Err(err) => {
                    tracing::error!(user_id = %session.user_id, error = %err, "mark read failed");
                    send_event(sender, &error_event("failed to mark message as read")).await
                }
            }
        }
        ClientCommand::SetTyping { key, is_typing } => {
            let key = key.trim();
            // Ephemeral signal: no persistence, never echoed to the sender,
            // silently dropped when the key is missing.
            if key.is_empty() {
                return Ok(());
            }
            state.rooms.broadcast_except(
                key,
                session.connection_id,
                ServerEvent::TypingIndicator {
                    key: key.to_string(),
                    user_id: session.user_id.clone(),
                    is_typing,
                },
            );
            Ok(())
        }
        ClientCommand::QueryOnlineUsers => {
            send_event(
                sender,
                &ServerEvent::OnlineUsersList {
                    users: state.presence.list_online(),
                },
            )
            .await
        }
    }
}

async fn reject(sender: &mut (impl SinkExt<Message> + Unpin), message: String) {
    let _ = send_event(sender, &ServerEvent::Error { message }).await;
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: 1008,
            reason: "authentication failed".into(),
        })))
        .await;
}

fn error_event(message: &str) -> ServerEvent {
    ServerEvent::Error {
        message: message.to_string(),
    }
}

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: &ServerEvent,
) -> Result<(), ()> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize server event");
            return Ok(());
        }
    };
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}
