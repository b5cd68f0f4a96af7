use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::chat_engine::ChatEngine;
use super::error::{EngineError, check};
use super::ids::{new_id, now_timestamp};
use super::patch::Patch;
use super::servers::{image_patch, normalize_description, normalize_image_url};
use super::user_session::CloseReason;
use super::users::{Presence, Profile};
use super::validation::validate_display_name;
use crate::db::models::{BotRow, UserRow};
use crate::db::queries::{bots, members, servers, users};

/// Public card for a bot, readable without a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotProfile {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub owner: BotOwner,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotOwner {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// A new bot with the only copy of its token.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedBot {
    #[serde(flatten)]
    pub bot: BotRow,
    pub token: String,
}

/// Partial bot update. Name and avatar live on the bot's user profile.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotPatch {
    #[serde(default)]
    pub name: Patch<String>,
    #[serde(default)]
    pub description: Patch<Option<String>>,
    #[serde(default)]
    pub avatar_url: Patch<Option<String>>,
}

impl ChatEngine {
    /// Create a bot account owned by the principal. The bot is a user that
    /// authenticates with the returned token and joins servers by invite.
    pub async fn create_bot(
        &self,
        principal: &str,
        name: &str,
        description: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<CreatedBot, EngineError> {
        let name = name.trim();
        check("name", validate_display_name(name))?;
        let description = normalize_description(description)?;
        let avatar_url = normalize_image_url("avatarUrl", avatar_url)?;

        let owner = self.get_user(principal).await?;
        if owner.is_bot {
            return Err(EngineError::Forbidden("bots cannot own bots"));
        }

        let now = now_timestamp();
        let user = UserRow {
            id: new_id(),
            display_name: name.to_string(),
            presence: Presence::Offline.as_str().to_string(),
            avatar_url,
            is_bot: true,
            created_at: now.clone(),
        };
        let token = self.authenticator().issue_token(&user.id)?;

        let mut tx = self.pool().begin().await?;
        users::create_user(&mut *tx, &user).await?;
        bots::register_bot(&mut *tx, &user.id, principal, description.as_deref(), &now).await?;
        let bot = bots::get_bot(&mut *tx, &user.id)
            .await?
            .ok_or(EngineError::NotFound("bot"))?;
        tx.commit().await?;

        info!(bot_id = %bot.id, owner_id = %principal, "bot created");
        Ok(CreatedBot { bot, token })
    }

    /// The principal's bots, newest first.
    pub async fn list_bots(&self, principal: &str) -> Result<Vec<BotRow>, EngineError> {
        Ok(bots::list_bots_for_owner(self.pool(), principal).await?)
    }

    /// A bot owned by the principal. Other people's bots are `NotFound`.
    pub async fn get_bot(&self, principal: &str, bot_id: &str) -> Result<BotRow, EngineError> {
        bots::get_bot(self.pool(), bot_id)
            .await?
            .filter(|bot| bot.owner_id == principal)
            .ok_or(EngineError::NotFound("bot"))
    }

    /// Public lookup used when inviting a bot.
    pub async fn bot_profile(&self, bot_id: &str) -> Result<BotProfile, EngineError> {
        let bot = bots::get_bot(self.pool(), bot_id)
            .await?
            .ok_or(EngineError::NotFound("bot"))?;
        let owner = self.get_user(&bot.owner_id).await?;
        Ok(BotProfile {
            id: bot.id,
            name: bot.name,
            description: bot.description,
            avatar_url: bot.avatar_url,
            owner: BotOwner {
                id: owner.id,
                display_name: owner.display_name,
                avatar_url: owner.avatar_url,
            },
            created_at: bot.created_at,
        })
    }

    /// Rename, describe or re-skin a bot. Name and avatar changes reach the
    /// bot's servers as user `Updated` events.
    pub async fn update_bot(
        &self,
        principal: &str,
        bot_id: &str,
        patch: BotPatch,
    ) -> Result<BotRow, EngineError> {
        let name = match patch.name {
            Patch::Set(name) => {
                let name = name.trim().to_string();
                check("name", validate_display_name(&name))?;
                Patch::Set(name)
            }
            Patch::Unset => Patch::Unset,
        };
        let description = match patch.description {
            Patch::Set(d) => Patch::Set(normalize_description(d.as_deref())?),
            Patch::Unset => Patch::Unset,
        };
        let avatar_url = image_patch("avatarUrl", patch.avatar_url)?;

        let _user_guard = self.lock_user(bot_id).await;
        let bot = self.get_bot(principal, bot_id).await?;

        let description = description.apply(bot.description.clone());
        if description != bot.description {
            bots::set_description(self.pool(), bot_id, description.as_deref()).await?;
        }

        let user = self.get_user(bot_id).await?;
        let profile = Profile {
            display_name: name.apply(user.display_name.clone()),
            avatar_url: avatar_url.apply(user.avatar_url.clone()),
            presence: Presence::parse(&user.presence).unwrap_or(Presence::Offline),
        };
        if profile.display_name != user.display_name || profile.avatar_url != user.avatar_url {
            self.write_profile(bot_id, &profile).await?;
        }

        info!(%bot_id, "bot updated");
        self.get_bot(principal, bot_id).await
    }

    /// Retire a bot: its token stops working, it leaves every server and
    /// its live sessions close. The user row stays as the author of its
    /// messages. A bot that still owns servers cannot be retired.
    pub async fn delete_bot(&self, principal: &str, bot_id: &str) -> Result<BotRow, EngineError> {
        let bot = self.get_bot(principal, bot_id).await?;

        {
            let _user_guard = self.lock_user(bot_id).await;
            let mut tx = self.pool().begin().await?;
            if servers::count_owned_by(&mut *tx, bot_id).await? > 0 {
                return Err(EngineError::Conflict(
                    "the bot still owns servers; transfer or delete them first".into(),
                ));
            }
            if !bots::unregister_bot(&mut *tx, bot_id).await? {
                return Err(EngineError::NotFound("bot"));
            }
            tx.commit().await?;
        }

        for server_id in members::list_server_ids_for_user(self.pool(), bot_id).await? {
            match self.leave_server(bot_id, &server_id).await {
                Ok(_) | Err(EngineError::NotFound(_)) => {}
                Err(e) => warn!(%bot_id, %server_id, error = %e, "retired bot could not leave server"),
            }
        }

        let closed = self
            .registry()
            .close_user(bot_id, CloseReason::AuthenticationFailed);
        if let Err(e) = self.refresh_presence(bot_id).await {
            warn!(%bot_id, error = %e, "presence update for retired bot failed");
        }
        info!(%bot_id, owner_id = %principal, sessions = closed.len(), "bot deleted");
        Ok(bot)
    }
}
