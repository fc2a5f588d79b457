use chrono::{DateTime, Utc};
use serde::Serialize;
use tradepost_models::message::MessageKind;
use uuid::Uuid;

use crate::{DbError, DbPool};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: String,
    pub conversation_key: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub sender_display: String,
    pub receiver_display: String,
    pub body: String,
    pub kind: MessageKind,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub read_by: Option<String>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub sender_display: String,
    pub receiver_display: String,
    pub body: String,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub key: String,
    pub counterpart: String,
    pub last_body: Option<String>,
    pub last_sender_display: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<MessageRow>,
    pub page: u32,
    pub total_pages: u32,
    pub total_messages: i64,
    pub has_more: bool,
}

pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Append a message, creating the conversation row on first write. The
/// conversation upsert and the message insert commit together; creation is a
/// single `ON CONFLICT` statement so two interleaved first-sends for the same
/// key can never fork into two conversation records.
pub async fn append(pool: &DbPool, key: &str, message: NewMessage) -> Result<MessageRow, DbError> {
    let now = Utc::now();
    let id = Uuid::new_v4().to_string();
    let (user_a, user_b) = if message.sender_id <= message.receiver_id {
        (&message.sender_id, &message.receiver_id)
    } else {
        (&message.receiver_id, &message.sender_id)
    };

    let mut tx = pool.begin().await.map_err(DbError::Sqlx)?;

    sqlx::query(
        "INSERT INTO conversations (key, user_a, user_b, last_activity, created_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT (key) DO UPDATE SET last_activity = excluded.last_activity",
    )
    .bind(key)
    .bind(user_a)
    .bind(user_b)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO messages (id, conversation_key, sender_id, receiver_id, sender_display,
                               receiver_display, body, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&id)
    .bind(key)
    .bind(&message.sender_id)
    .bind(&message.receiver_id)
    .bind(&message.sender_display)
    .bind(&message.receiver_display)
    .bind(&message.body)
    .bind(message.kind)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await.map_err(DbError::Sqlx)?;

    Ok(MessageRow {
        id,
        conversation_key: key.to_string(),
        sender_id: message.sender_id,
        receiver_id: message.receiver_id,
        sender_display: message.sender_display,
        receiver_display: message.receiver_display,
        body: message.body,
        kind: message.kind,
        read: false,
        read_at: None,
        read_by: None,
        edited: false,
        edited_at: None,
        created_at: now,
    })
}

/// Flip a single message to read. The `read = 0` guard keeps the transition
/// one-way and `read_at`/`read_by` first-write-only; an unknown id and an
/// already-read message are indistinguishable to the caller.
pub async fn mark_read(
    pool: &DbPool,
    message_id: &str,
    reader_id: &str,
) -> Result<DateTime<Utc>, DbError> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE messages SET read = 1, read_at = ?2, read_by = ?3
         WHERE id = ?1 AND read = 0",
    )
    .bind(message_id)
    .bind(now)
    .bind(reader_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(now)
}

/// Mark every message in the conversation that was sent *to* the reader and
/// is still unread. Safe to call repeatedly.
pub async fn mark_all_read(pool: &DbPool, key: &str, reader_id: &str) -> Result<u64, DbError> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE messages SET read = 1, read_at = ?3, read_by = ?2
         WHERE conversation_key = ?1 AND sender_id != ?2 AND read = 0",
    )
    .bind(key)
    .bind(reader_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Paginated history, newest page first: page 1 holds the most recent
/// `page_size` messages in reverse-chronological order. A missing
/// conversation yields an empty page with zero pages; a page past the end
/// yields an empty slice but the totals are still reported.
pub async fn history(
    pool: &DbPool,
    key: &str,
    page: u32,
    page_size: u32,
) -> Result<HistoryPage, DbError> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

    let total_messages: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_key = ?1")
            .bind(key)
            .fetch_one(pool)
            .await?;

    let total_pages = (total_messages as u64).div_ceil(page_size as u64) as u32;

    let messages = sqlx::query_as::<_, MessageRow>(
        "SELECT id, conversation_key, sender_id, receiver_id, sender_display, receiver_display,
                body, kind, read, read_at, read_by, edited, edited_at, created_at
         FROM messages
         WHERE conversation_key = ?1
         ORDER BY rowid DESC
         LIMIT ?2 OFFSET ?3",
    )
    .bind(key)
    .bind(page_size as i64)
    .bind((page as i64 - 1) * page_size as i64)
    .fetch_all(pool)
    .await?;

    Ok(HistoryPage {
        messages,
        page,
        total_pages,
        total_messages,
        has_more: page < total_pages,
    })
}

/// One summary per conversation the user participates in, most recently
/// active first.
pub async fn list_for_user(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<ConversationSummary>, DbError> {
    let rows = sqlx::query_as::<_, ConversationSummary>(
        "SELECT c.key,
                CASE WHEN c.user_a = ?1 THEN c.user_b ELSE c.user_a END AS counterpart,
                (SELECT m.body FROM messages m WHERE m.conversation_key = c.key
                 ORDER BY m.rowid DESC LIMIT 1) AS last_body,
                (SELECT m.sender_display FROM messages m WHERE m.conversation_key = c.key
                 ORDER BY m.rowid DESC LIMIT 1) AS last_sender_display,
                (SELECT m.created_at FROM messages m WHERE m.conversation_key = c.key
                 ORDER BY m.rowid DESC LIMIT 1) AS last_timestamp,
                (SELECT COUNT(*) FROM messages m WHERE m.conversation_key = c.key
                 AND m.sender_id != ?1 AND m.read = 0) AS unread_count
         FROM conversations c
         WHERE c.user_a = ?1 OR c.user_b = ?1
         ORDER BY c.last_activity DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
