use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tradepost_core::{convkey, AppState};
use tradepost_db::notifications;
use tradepost_models::notification::{NotificationKind, NotificationPriority};

use crate::error::ApiError;
use crate::middleware::AuthUser;

const MAX_NOTIFICATION_CHARS: usize = 500;

fn require_participant(key: &str, user_id: &str) -> Result<(), ApiError> {
    if convkey::is_participant(key, user_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub to_user: String,
    pub body: String,
    #[serde(default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub priority: NotificationPriority,
}

/// Manual notification entry; the chat pipeline writes its own records, this
/// is for non-chat entries (system messages, alerts).
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.to_user.is_empty() {
        return Err(ApiError::BadRequest("toUser is required".into()));
    }
    if body.body.trim().is_empty() {
        return Err(ApiError::BadRequest("body is required".into()));
    }
    if body.body.chars().count() > MAX_NOTIFICATION_CHARS {
        return Err(ApiError::BadRequest(format!(
            "body too long (max {MAX_NOTIFICATION_CHARS} characters)"
        )));
    }

    let key = convkey::conversation_key(&auth.user_id, &body.to_user);
    let row = notifications::append(
        &state.db,
        &key,
        notifications::NewNotification {
            to_user: body.to_user,
            from_user: auth.user_id,
            body: body.body,
            kind: body.kind,
            message_id: body.message_id,
            preview: body.preview,
            priority: body.priority,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(json!({ "notification": row }))))
}

pub async fn list_unread(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let rows = notifications::list_unread_for_user(&state.db, &auth.user_id).await?;
    Ok(Json(json!({ "count": rows.len(), "notifications": rows })))
}

pub async fn stats(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let stats = notifications::stats(&state.db, &auth.user_id).await?;
    Ok(Json(json!({ "stats": stats })))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_participant(&key, &auth.user_id)?;
    let updated = notifications::mark_all_read(&state.db, &key, &auth.user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((key, notif_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    require_participant(&key, &auth.user_id)?;
    notifications::mark_read(&state.db, &notif_id, &key).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((key, notif_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    require_participant(&key, &auth.user_id)?;
    notifications::delete(&state.db, &notif_id, &key).await?;
    Ok(Json(json!({ "success": true })))
}
