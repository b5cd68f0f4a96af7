use sqlx::SqliteExecutor;

use crate::db::models::ChannelRow;

pub async fn create_channel<'e>(
    ex: impl SqliteExecutor<'e>,
    channel: &ChannelRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO channels (id, server_id, name, description, position, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&channel.id)
    .bind(&channel.server_id)
    .bind(&channel.name)
    .bind(&channel.description)
    .bind(channel.position)
    .bind(&channel.created_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_channel<'e>(
    ex: impl SqliteExecutor<'e>,
    channel_id: &str,
) -> Result<Option<ChannelRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE id = ?")
        .bind(channel_id)
        .fetch_optional(ex)
        .await
}

/// Channels of a server in position order.
pub async fn list_channels<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
) -> Result<Vec<ChannelRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelRow>(
        "SELECT * FROM channels WHERE server_id = ? ORDER BY position, id",
    )
    .bind(server_id)
    .fetch_all(ex)
    .await
}

pub async fn count_channels<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM channels WHERE server_id = ?")
        .bind(server_id)
        .fetch_one(ex)
        .await
}

/// Whether another channel in the server already uses this name (ASCII case-insensitive).
pub async fn name_taken<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
    name: &str,
    exclude_channel_id: Option<&str>,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM channels \
         WHERE server_id = ? AND lower(name) = lower(?) AND id != COALESCE(?, '')",
    )
    .bind(server_id)
    .bind(name)
    .bind(exclude_channel_id)
    .fetch_one(ex)
    .await
}

pub async fn update_details<'e>(
    ex: impl SqliteExecutor<'e>,
    channel_id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE channels SET name = ?, description = ? WHERE id = ?")
        .bind(name)
        .bind(description)
        .bind(channel_id)
        .execute(ex)
        .await?;
    Ok(())
}

/// Add `delta` to every position in `[low, high]` within a server, as one statement.
pub async fn shift_positions<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
    low: i64,
    high: i64,
    delta: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE channels SET position = position + ? \
         WHERE server_id = ? AND position >= ? AND position <= ?",
    )
    .bind(delta)
    .bind(server_id)
    .bind(low)
    .bind(high)
    .execute(ex)
    .await?;
    Ok(result.rows_affected())
}

pub async fn set_position<'e>(
    ex: impl SqliteExecutor<'e>,
    channel_id: &str,
    position: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE channels SET position = ? WHERE id = ?")
        .bind(position)
        .bind(channel_id)
        .execute(ex)
        .await?;
    Ok(())
}

/// Delete a channel. Its messages cascade.
pub async fn delete_channel<'e>(
    ex: impl SqliteExecutor<'e>,
    channel_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM channels WHERE id = ?")
        .bind(channel_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ServerRow, UserRow};
    use crate::db::pool::{create_pool, run_migrations};
    use crate::db::queries::{servers, users};
    use sqlx::SqlitePool;

    const TS: &str = "2026-01-01T00:00:00.000Z";

    async fn setup_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        users::create_user(
            &pool,
            &UserRow {
                id: "u1".into(),
                display_name: "alice".into(),
                presence: "offline".into(),
                avatar_url: None,
                is_bot: false,
                created_at: TS.into(),
            },
        )
        .await
        .unwrap();
        servers::create_server(
            &pool,
            &ServerRow {
                id: "s1".into(),
                owner_id: "u1".into(),
                name: "Test".into(),
                description: None,
                icon_url: None,
                banner_url: None,
                created_at: TS.into(),
            },
        )
        .await
        .unwrap();
        pool
    }

    async fn add(pool: &SqlitePool, id: &str, name: &str, position: i64) {
        create_channel(
            pool,
            &ChannelRow {
                id: id.into(),
                server_id: "s1".into(),
                name: name.into(),
                description: None,
                position,
                created_at: TS.into(),
            },
        )
        .await
        .unwrap();
    }

    fn names(channels: &[ChannelRow]) -> Vec<&str> {
        channels.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_list_channels_in_position_order() {
        let pool = setup_db().await;
        add(&pool, "c2", "second", 1).await;
        add(&pool, "c1", "first", 0).await;
        add(&pool, "c3", "third", 2).await;

        let channels = list_channels(&pool, "s1").await.unwrap();
        assert_eq!(names(&channels), vec!["first", "second", "third"]);
        assert_eq!(count_channels(&pool, "s1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_name_taken_is_case_insensitive() {
        let pool = setup_db().await;
        add(&pool, "c1", "General", 0).await;

        assert!(name_taken(&pool, "s1", "general", None).await.unwrap());
        assert!(name_taken(&pool, "s1", "GENERAL", None).await.unwrap());
        assert!(!name_taken(&pool, "s1", "random", None).await.unwrap());
        assert!(
            !name_taken(&pool, "s1", "general", Some("c1")).await.unwrap(),
            "a channel never conflicts with itself"
        );
    }

    #[tokio::test]
    async fn test_shift_positions_closes_gap() {
        let pool = setup_db().await;
        add(&pool, "c1", "a", 0).await;
        add(&pool, "c2", "b", 1).await;
        add(&pool, "c3", "c", 2).await;

        delete_channel(&pool, "c2").await.unwrap();
        let moved = shift_positions(&pool, "s1", 2, i64::MAX, -1).await.unwrap();
        assert_eq!(moved, 1);

        let channels = list_channels(&pool, "s1").await.unwrap();
        let positions: Vec<i64> = channels.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![0, 1]);
        assert_eq!(names(&channels), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_update_details() {
        let pool = setup_db().await;
        add(&pool, "c1", "a", 0).await;
        update_details(&pool, "c1", "renamed", Some("topic")).await.unwrap();
        let channel = get_channel(&pool, "c1").await.unwrap().unwrap();
        assert_eq!(channel.name, "renamed");
        assert_eq!(channel.description.as_deref(), Some("topic"));
    }
}
