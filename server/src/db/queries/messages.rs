use sqlx::SqliteExecutor;

use crate::db::models::MessageRow;

pub async fn insert_message<'e>(
    ex: impl SqliteExecutor<'e>,
    message: &MessageRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO messages (id, channel_id, server_id, author_id, content, nonce, created_at, edited_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&message.id)
    .bind(&message.channel_id)
    .bind(&message.server_id)
    .bind(&message.author_id)
    .bind(&message.content)
    .bind(&message.nonce)
    .bind(&message.created_at)
    .bind(&message.edited_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_message<'e>(
    ex: impl SqliteExecutor<'e>,
    message_id: &str,
) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = ?")
        .bind(message_id)
        .fetch_optional(ex)
        .await
}

pub async fn update_content<'e>(
    ex: impl SqliteExecutor<'e>,
    message_id: &str,
    content: &str,
    edited_at: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE messages SET content = ?, edited_at = ? WHERE id = ?")
        .bind(content)
        .bind(edited_at)
        .bind(message_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_message<'e>(
    ex: impl SqliteExecutor<'e>,
    message_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM messages WHERE id = ?")
        .bind(message_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Fetch up to `limit` messages older than `before` (exclusive), newest first.
/// Message ids sort by creation time, so the id doubles as the cursor.
pub async fn fetch_history<'e>(
    ex: impl SqliteExecutor<'e>,
    channel_id: &str,
    before: Option<&str>,
    limit: i64,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    match before {
        Some(cursor) => {
            sqlx::query_as::<_, MessageRow>(
                "SELECT * FROM messages WHERE channel_id = ? AND id < ? \
                 ORDER BY id DESC LIMIT ?",
            )
            .bind(channel_id)
            .bind(cursor)
            .bind(limit)
            .fetch_all(ex)
            .await
        }
        None => {
            sqlx::query_as::<_, MessageRow>(
                "SELECT * FROM messages WHERE channel_id = ? ORDER BY id DESC LIMIT ?",
            )
            .bind(channel_id)
            .bind(limit)
            .fetch_all(ex)
            .await
        }
    }
}
