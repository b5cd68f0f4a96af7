use sqlx::SqliteExecutor;

use crate::db::models::ServerRow;

pub async fn create_server<'e>(
    ex: impl SqliteExecutor<'e>,
    server: &ServerRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO servers (id, owner_id, name, description, icon_url, banner_url, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&server.id)
    .bind(&server.owner_id)
    .bind(&server.name)
    .bind(&server.description)
    .bind(&server.icon_url)
    .bind(&server.banner_url)
    .bind(&server.created_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_server<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
) -> Result<Option<ServerRow>, sqlx::Error> {
    sqlx::query_as::<_, ServerRow>("SELECT * FROM servers WHERE id = ?")
        .bind(server_id)
        .fetch_optional(ex)
        .await
}

/// Servers the user is a member of, oldest first.
pub async fn list_servers_for_user<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: &str,
) -> Result<Vec<ServerRow>, sqlx::Error> {
    sqlx::query_as::<_, ServerRow>(
        "SELECT s.* FROM servers s \
         JOIN server_members sm ON s.id = sm.server_id \
         WHERE sm.user_id = ? \
         ORDER BY s.id",
    )
    .bind(user_id)
    .fetch_all(ex)
    .await
}

/// Write the editable fields of `server` (everything but owner and creation time).
pub async fn update_server<'e>(
    ex: impl SqliteExecutor<'e>,
    server: &ServerRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE servers SET name = ?, description = ?, icon_url = ?, banner_url = ? WHERE id = ?",
    )
    .bind(&server.name)
    .bind(&server.description)
    .bind(&server.icon_url)
    .bind(&server.banner_url)
    .bind(&server.id)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn set_owner<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
    owner_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE servers SET owner_id = ? WHERE id = ?")
        .bind(owner_id)
        .bind(server_id)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn count_owned_by<'e>(ex: impl SqliteExecutor<'e>, user_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM servers WHERE owner_id = ?")
        .bind(user_id)
        .fetch_one(ex)
        .await
}

/// Delete a server. Memberships, channels, messages and invites cascade.
pub async fn delete_server<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM servers WHERE id = ?")
        .bind(server_id)
        .execute(ex)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::UserRow;
    use crate::db::pool::{create_pool, run_migrations};
    use crate::db::queries::{members, users};
    use sqlx::SqlitePool;

    const TS: &str = "2026-01-01T00:00:00.000Z";

    async fn setup_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        for id in ["u1", "u2"] {
            users::create_user(
                &pool,
                &UserRow {
                    id: id.into(),
                    display_name: id.into(),
                    presence: "offline".into(),
                    avatar_url: None,
                    is_bot: false,
                    created_at: TS.into(),
                },
            )
            .await
            .unwrap();
        }
        pool
    }

    fn server(id: &str, owner: &str) -> ServerRow {
        ServerRow {
            id: id.into(),
            owner_id: owner.into(),
            name: format!("server {id}"),
            description: None,
            icon_url: None,
            banner_url: None,
            created_at: TS.into(),
        }
    }

    #[tokio::test]
    async fn test_create_get_update_server() {
        let pool = setup_db().await;
        create_server(&pool, &server("s1", "u1")).await.unwrap();

        let mut edited = server("s1", "u1");
        edited.name = "Renamed".into();
        edited.description = Some("about".into());
        edited.icon_url = Some("https://cdn.example.com/icon.png".into());
        update_server(&pool, &edited).await.unwrap();
        let found = get_server(&pool, "s1").await.unwrap().unwrap();
        assert_eq!(found, edited);

        edited.description = None;
        edited.icon_url = None;
        update_server(&pool, &edited).await.unwrap();
        let found = get_server(&pool, "s1").await.unwrap().unwrap();
        assert!(found.description.is_none());
        assert!(found.icon_url.is_none());
        assert_eq!(found.owner_id, "u1");
    }

    #[tokio::test]
    async fn test_list_servers_for_user_only_memberships() {
        let pool = setup_db().await;
        create_server(&pool, &server("s1", "u1")).await.unwrap();
        create_server(&pool, &server("s2", "u2")).await.unwrap();
        members::add_member(&pool, "s1", "u1", "owner", TS).await.unwrap();
        members::add_member(&pool, "s2", "u2", "owner", TS).await.unwrap();
        members::add_member(&pool, "s2", "u1", "", TS).await.unwrap();

        let ids: Vec<String> = list_servers_for_user(&pool, "u1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["s1", "s2"]);

        let ids: Vec<String> = list_servers_for_user(&pool, "u2")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["s2"]);
    }

    #[tokio::test]
    async fn test_count_owned_by() {
        let pool = setup_db().await;
        create_server(&pool, &server("s1", "u1")).await.unwrap();
        create_server(&pool, &server("s2", "u1")).await.unwrap();
        assert_eq!(count_owned_by(&pool, "u1").await.unwrap(), 2);
        assert_eq!(count_owned_by(&pool, "u2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_owner_and_delete() {
        let pool = setup_db().await;
        create_server(&pool, &server("s1", "u1")).await.unwrap();
        set_owner(&pool, "s1", "u2").await.unwrap();
        assert_eq!(get_server(&pool, "s1").await.unwrap().unwrap().owner_id, "u2");

        assert!(delete_server(&pool, "s1").await.unwrap());
        assert!(!delete_server(&pool, "s1").await.unwrap());
        assert!(get_server(&pool, "s1").await.unwrap().is_none());
    }
}
