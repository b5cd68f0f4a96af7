use sqlx::SqliteExecutor;

use crate::db::models::BotRow;

/// Register an existing bot user under its owner.
pub async fn register_bot<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: &str,
    owner_id: &str,
    description: Option<&str>,
    created_at: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO bots (user_id, owner_id, description, created_at) VALUES (?, ?, ?, ?)")
        .bind(user_id)
        .bind(owner_id)
        .bind(description)
        .bind(created_at)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn get_bot<'e>(ex: impl SqliteExecutor<'e>, bot_id: &str) -> Result<Option<BotRow>, sqlx::Error> {
    sqlx::query_as::<_, BotRow>(
        "SELECT u.id, b.owner_id, u.display_name AS name, b.description, u.avatar_url, b.created_at \
         FROM bots b JOIN users u ON u.id = b.user_id \
         WHERE b.user_id = ?",
    )
    .bind(bot_id)
    .fetch_optional(ex)
    .await
}

/// An owner's bots, newest first.
pub async fn list_bots_for_owner<'e>(
    ex: impl SqliteExecutor<'e>,
    owner_id: &str,
) -> Result<Vec<BotRow>, sqlx::Error> {
    sqlx::query_as::<_, BotRow>(
        "SELECT u.id, b.owner_id, u.display_name AS name, b.description, u.avatar_url, b.created_at \
         FROM bots b JOIN users u ON u.id = b.user_id \
         WHERE b.owner_id = ? ORDER BY b.created_at DESC, u.id DESC",
    )
    .bind(owner_id)
    .fetch_all(ex)
    .await
}

pub async fn set_description<'e>(
    ex: impl SqliteExecutor<'e>,
    bot_id: &str,
    description: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE bots SET description = ? WHERE user_id = ?")
        .bind(description)
        .bind(bot_id)
        .execute(ex)
        .await?;
    Ok(())
}

/// Drop a bot's registration. Returns false when it was already gone.
pub async fn unregister_bot<'e>(ex: impl SqliteExecutor<'e>, bot_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM bots WHERE user_id = ?")
        .bind(bot_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected() > 0)
}
