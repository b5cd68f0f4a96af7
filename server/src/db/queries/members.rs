use sqlx::SqliteExecutor;

use crate::db::models::MemberRow;

/// Insert a membership. Idempotent per (server, user): returns false if the
/// pair already existed and leaves the existing row untouched.
pub async fn add_member<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
    user_id: &str,
    roles: &str,
    joined_at: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO server_members (server_id, user_id, roles, joined_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(server_id)
    .bind(user_id)
    .bind(roles)
    .bind(joined_at)
    .execute(ex)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_member<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
    user_id: &str,
) -> Result<Option<MemberRow>, sqlx::Error> {
    sqlx::query_as::<_, MemberRow>(
        "SELECT * FROM server_members WHERE server_id = ? AND user_id = ?",
    )
    .bind(server_id)
    .bind(user_id)
    .fetch_optional(ex)
    .await
}

pub async fn list_members<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
) -> Result<Vec<MemberRow>, sqlx::Error> {
    sqlx::query_as::<_, MemberRow>(
        "SELECT * FROM server_members WHERE server_id = ? ORDER BY joined_at, user_id",
    )
    .bind(server_id)
    .fetch_all(ex)
    .await
}

/// Ids of every server the user belongs to, in id order.
pub async fn list_server_ids_for_user<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT server_id FROM server_members WHERE user_id = ? ORDER BY server_id",
    )
    .bind(user_id)
    .fetch_all(ex)
    .await
}

pub async fn set_roles<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
    user_id: &str,
    roles: &str,
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("UPDATE server_members SET roles = ? WHERE server_id = ? AND user_id = ?")
            .bind(roles)
            .bind(server_id)
            .bind(user_id)
            .execute(ex)
            .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn remove_member<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
    user_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM server_members WHERE server_id = ? AND user_id = ?")
        .bind(server_id)
        .bind(user_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected() > 0)
}
