use serde::{Deserialize, Serialize};

/// A stored user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: String,
    pub display_name: String,
    /// One of `online`, `idle`, `busy`, `invisible`, `offline`.
    pub presence: String,
    pub avatar_url: Option<String>,
    /// Bot accounts are owned by another user, see `BotRow`.
    pub is_bot: bool,
    pub created_at: String,
}

/// A stored server (community).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServerRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub banner_url: Option<String>,
    pub created_at: String,
}

/// A server membership record. `roles` is a comma-separated tag list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MemberRow {
    pub server_id: String,
    pub user_id: String,
    pub roles: String,
    pub joined_at: String,
}

impl MemberRow {
    /// Role tags as a list, empty for plain members.
    pub fn role_tags(&self) -> Vec<&str> {
        self.roles
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// A stored channel. Positions are dense and zero-based per server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRow {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub description: Option<String>,
    pub position: i64,
    pub created_at: String,
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub server_id: String,
    pub author_id: String,
    pub content: String,
    /// Client-chosen correlation token, echoed back untouched.
    pub nonce: Option<String>,
    pub created_at: String,
    pub edited_at: Option<String>,
}

/// A stored invite code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InviteRow {
    pub code: String,
    pub server_id: String,
    pub creator_id: String,
    pub uses: i64,
    pub max_uses: Option<i64>,
    pub expires_at: Option<String>,
    pub created_at: String,
}

/// A bot account joined with its registration. `id` is the bot's user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BotRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}
