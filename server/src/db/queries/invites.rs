use sqlx::SqliteExecutor;

use crate::db::models::InviteRow;

pub async fn create_invite<'e>(
    ex: impl SqliteExecutor<'e>,
    invite: &InviteRow,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO invites (code, server_id, creator_id, uses, max_uses, expires_at, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&invite.code)
    .bind(&invite.server_id)
    .bind(&invite.creator_id)
    .bind(invite.uses)
    .bind(invite.max_uses)
    .bind(&invite.expires_at)
    .bind(&invite.created_at)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get_invite<'e>(
    ex: impl SqliteExecutor<'e>,
    code: &str,
) -> Result<Option<InviteRow>, sqlx::Error> {
    sqlx::query_as::<_, InviteRow>("SELECT * FROM invites WHERE code = ?")
        .bind(code)
        .fetch_optional(ex)
        .await
}

pub async fn list_server_invites<'e>(
    ex: impl SqliteExecutor<'e>,
    server_id: &str,
) -> Result<Vec<InviteRow>, sqlx::Error> {
    sqlx::query_as::<_, InviteRow>(
        "SELECT * FROM invites WHERE server_id = ? ORDER BY created_at DESC, code",
    )
    .bind(server_id)
    .fetch_all(ex)
    .await
}

/// Take one use of an invite. The bound check and the increment are one
/// statement, so the counter can never pass `max_uses`. Returns false when
/// the invite is exhausted or gone.
pub async fn consume_use<'e>(ex: impl SqliteExecutor<'e>, code: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE invites SET uses = uses + 1 \
         WHERE code = ? AND (max_uses IS NULL OR uses < max_uses)",
    )
    .bind(code)
    .execute(ex)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn delete_invite<'e>(ex: impl SqliteExecutor<'e>, code: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM invites WHERE code = ?")
        .bind(code)
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

    fn invite(code: &str, max_uses: Option<i64>) -> InviteRow {
        InviteRow {
            code: code.into(),
            server_id: "s1".into(),
            creator_id: "u1".into(),
            uses: 0,
            max_uses,
            expires_at: None,
            created_at: TS.into(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_invite() {
        let pool = setup_db().await;
        create_invite(&pool, &invite("abcd2345", Some(3))).await.unwrap();

        let found = get_invite(&pool, "abcd2345").await.unwrap().unwrap();
        assert_eq!(found.server_id, "s1");
        assert_eq!(found.max_uses, Some(3));
        assert_eq!(found.uses, 0);
        assert_eq!(list_server_invites(&pool, "s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let pool = setup_db().await;
        create_invite(&pool, &invite("abcd2345", None)).await.unwrap();
        assert!(create_invite(&pool, &invite("abcd2345", None)).await.is_err());
    }

    #[tokio::test]
    async fn test_consume_use_stops_at_max() {
        let pool = setup_db().await;
        create_invite(&pool, &invite("abcd2345", Some(2))).await.unwrap();

        assert!(consume_use(&pool, "abcd2345").await.unwrap());
        assert!(consume_use(&pool, "abcd2345").await.unwrap());
        assert!(!consume_use(&pool, "abcd2345").await.unwrap());

        let found = get_invite(&pool, "abcd2345").await.unwrap().unwrap();
        assert_eq!(found.uses, 2);
    }

    #[tokio::test]
    async fn test_consume_use_unlimited() {
        let pool = setup_db().await;
        create_invite(&pool, &invite("zzzz2345", None)).await.unwrap();
        for _ in 0..10 {
            assert!(consume_use(&pool, "zzzz2345").await.unwrap());
        }
        assert!(!consume_use(&pool, "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_invite() {
        let pool = setup_db().await;
        create_invite(&pool, &invite("abcd2345", None)).await.unwrap();
        assert!(delete_invite(&pool, "abcd2345").await.unwrap());
        assert!(!delete_invite(&pool, "abcd2345").await.unwrap());
    }
}
