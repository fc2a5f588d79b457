use chrono::{DateTime, Utc};
use serde::Serialize;
use tradepost_models::notification::{NotificationKind, NotificationPriority};
use uuid::Uuid;

use crate::{DbError, DbPool};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRow {
    pub id: String,
    pub conversation_key: String,
    pub to_user: String,
    pub from_user: String,
    pub body: String,
    pub kind: NotificationKind,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub message_id: Option<String>,
    pub preview: Option<String>,
    pub priority: NotificationPriority,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub to_user: String,
    pub from_user: String,
    pub body: String,
    pub kind: NotificationKind,
    pub message_id: Option<String>,
    pub preview: Option<String>,
    pub priority: NotificationPriority,
}

#[derive(Debug, Clone, Copy, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub total: i64,
    pub unread: i64,
    pub read: i64,
    pub conversations: i64,
}

/// Append a notification, creating its per-conversation thread on first
/// write. The thread upsert is a single `ON CONFLICT` statement committed
/// together with the row insert, so concurrent first appends for the same
/// key land in one thread.
pub async fn append(
    pool: &DbPool,
    key: &str,
    notification: NewNotification,
) -> Result<NotificationRow, DbError> {
    let now = Utc::now();
    let id = Uuid::new_v4().to_string();
    let (user_a, user_b) = if notification.to_user <= notification.from_user {
        (&notification.to_user, &notification.from_user)
    } else {
        (&notification.from_user, &notification.to_user)
    };

    let mut tx = pool.begin().await.map_err(DbError::Sqlx)?;

    sqlx::query(
        "INSERT INTO notification_threads (conversation_key, user_a, user_b, last_notification_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT (conversation_key) DO UPDATE SET last_notification_at = excluded.last_notification_at",
    )
    .bind(key)
    .bind(user_a)
    .bind(user_b)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO notifications (id, conversation_key, to_user, from_user, body, kind,
                                    created_at, message_id, preview, priority)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(&id)
    .bind(key)
    .bind(&notification.to_user)
    .bind(&notification.from_user)
    .bind(&notification.body)
    .bind(notification.kind)
    .bind(now)
    .bind(&notification.message_id)
    .bind(&notification.preview)
    .bind(notification.priority)
    .execute(&mut *tx)
    .await?;

    tx.commit().await.map_err(DbError::Sqlx)?;

    Ok(NotificationRow {
        id,
        conversation_key: key.to_string(),
        to_user: notification.to_user,
        from_user: notification.from_user,
        body: notification.body,
        kind: notification.kind,
        read: false,
        read_at: None,
        created_at: now,
        message_id: notification.message_id,
        preview: notification.preview,
        priority: notification.priority,
    })
}

/// Flip one notification to read. Re-marking an already-read notification is
/// a no-op that leaves `read_at` as first written; a missing notification is
/// `NotFound`.
pub async fn mark_read(pool: &DbPool, notif_id: &str, key: &str) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE notifications SET read = 1, read_at = ?3
         WHERE id = ?1 AND conversation_key = ?2 AND read = 0",
    )
    .bind(notif_id)
    .bind(key)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM notifications WHERE id = ?1 AND conversation_key = ?2",
        )
        .bind(notif_id)
        .bind(key)
        .fetch_optional(pool)
        .await?;
        if exists.is_none() {
            return Err(DbError::NotFound);
        }
    }
    Ok(())
}

/// Mark read every unread notification addressed to `user_id` in the
/// conversation. Idempotent; returns the number of rows flipped.
pub async fn mark_all_read(pool: &DbPool, key: &str, user_id: &str) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE notifications SET read = 1, read_at = ?3
         WHERE conversation_key = ?1 AND to_user = ?2 AND read = 0",
    )
    .bind(key)
    .bind(user_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete(pool: &DbPool, notif_id: &str, key: &str) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = ?1 AND conversation_key = ?2")
        .bind(notif_id)
        .bind(key)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Unread notifications addressed to the user, flattened across all of
/// their conversations, newest first.
pub async fn list_unread_for_user(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<NotificationRow>, DbError> {
    let rows = sqlx::query_as::<_, NotificationRow>(
        "SELECT id, conversation_key, to_user, from_user, body, kind, read, read_at,
                created_at, message_id, preview, priority
         FROM notifications
         WHERE to_user = ?1 AND read = 0
         ORDER BY created_at DESC, rowid DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn stats(pool: &DbPool, user_id: &str) -> Result<NotificationStats, DbError> {
    let (total, unread): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN read = 0 THEN 1 ELSE 0 END), 0)
         FROM notifications WHERE to_user = ?1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let conversations: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notification_threads WHERE user_a = ?1 OR user_b = ?1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(NotificationStats {
        total,
        unread,
        read: total - unread,
        conversations,
    })
}

/// Retention sweep: drop notifications created before the cutoff, across all
/// threads. Thread rows stay; they are cheap and keep membership queries
/// stable.
pub async fn purge_older_than(pool: &DbPool, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM notifications WHERE created_at < ?1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
