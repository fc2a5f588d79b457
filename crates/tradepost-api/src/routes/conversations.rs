use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tradepost_core::{convkey, AppState};
use tradepost_db::conversations;

use crate::error::ApiError;
use crate::middleware::AuthUser;

fn require_participant(key: &str, user_id: &str) -> Result<(), ApiError> {
    if convkey::is_participant(key, user_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let summaries = conversations::list_for_user(&state.db, &auth.user_id).await?;
    Ok(Json(json!({ "conversations": summaries })))
}

/// Derive the canonical key shared with another user; no record is created.
pub async fn key_with(
    State(_state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user id is required".into()));
    }
    if user_id == auth.user_id {
        return Err(ApiError::BadRequest(
            "cannot start a conversation with yourself".into(),
        ));
    }
    let key = convkey::conversation_key(&auth.user_id, &user_id);
    Ok(Json(json!({ "key": key })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

pub async fn get_history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(key): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    require_participant(&key, &auth.user_id)?;
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(conversations::DEFAULT_PAGE_SIZE);
    let history = conversations::history(&state.db, &key, page, page_size).await?;
    Ok(Json(json!(history)))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_participant(&key, &auth.user_id)?;
    let updated = conversations::mark_all_read(&state.db, &key, &auth.user_id).await?;
    Ok(Json(json!({ "updated": updated })))
}
