use sqlx::SqliteExecutor;

use crate::db::models::UserRow;

/// Insert a new user profile.
pub async fn create_user<'e>(ex: impl SqliteExecutor<'e>, user: &UserRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO users (id, display_name, presence, avatar_url, is_bot, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.display_name)
    .bind(&user.presence)
    .bind(&user.avatar_url)
    .bind(user.is_bot)
    .bind(&user.created_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_user<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: &str,
) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(ex)
        .await
}

/// Replace the mutable profile fields. Returns false when the user doesn't exist.
pub async fn update_profile<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: &str,
    display_name: &str,
    avatar_url: Option<&str>,
    presence: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE users SET display_name = ?, avatar_url = ?, presence = ? WHERE id = ?",
    )
    .bind(display_name)
    .bind(avatar_url)
    .bind(presence)
    .bind(user_id)
    .execute(ex)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Whether `user_id` may act: the user exists and, for a bot, its
/// registration has not been deleted.
pub async fn is_active<'e>(ex: impl SqliteExecutor<'e>, user_id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM users u WHERE u.id = ? \
         AND (u.is_bot = 0 OR EXISTS (SELECT 1 FROM bots b WHERE b.user_id = u.id)))",
    )
    .bind(user_id)
    .fetch_one(ex)
    .await
}
