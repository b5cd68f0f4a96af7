use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::chat_engine::ChatEngine;
use super::error::{EngineError, check};
use super::events::DomainEvent;
use super::ids::{new_id, now_timestamp};
use super::patch::Patch;
use super::servers::image_patch;
use super::validation::validate_display_name;
use crate::db::models::UserRow;
use crate::db::queries::{members, users};

/// A user's advertised status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Idle,
    Busy,
    Invisible,
    Offline,
}

impl Presence {
    pub fn as_str(self) -> &'static str {
        match self {
            Presence::Online => "online",
            Presence::Idle => "idle",
            Presence::Busy => "busy",
            Presence::Invisible => "invisible",
            Presence::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "online" => Some(Presence::Online),
            "idle" => Some(Presence::Idle),
            "busy" => Some(Presence::Busy),
            "invisible" => Some(Presence::Invisible),
            "offline" => Some(Presence::Offline),
            _ => None,
        }
    }
}

/// Partial profile update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(default)]
    pub display_name: Patch<String>,
    #[serde(default)]
    pub presence: Patch<Presence>,
    #[serde(default)]
    pub avatar_url: Patch<Option<String>>,
}

/// The user-visible fields `write_profile` persists.
pub(crate) struct Profile {
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub presence: Presence,
}

impl Profile {
    fn matches(&self, row: &UserRow) -> bool {
        self.display_name == row.display_name
            && self.avatar_url == row.avatar_url
            && self.presence.as_str() == row.presence
    }
}

/// Presence a user should have given how many sessions they hold.
/// A chosen status survives while connected; the first session brings an
/// offline user online, and losing the last one takes them offline.
fn desired_presence(current: Presence, live_sessions: usize) -> Presence {
    match (live_sessions, current) {
        (0, _) => Presence::Offline,
        (_, Presence::Offline) => Presence::Online,
        (_, chosen) => chosen,
    }
}

impl ChatEngine {
    /// Provision a user profile. Users start offline.
    pub async fn create_user(&self, display_name: &str) -> Result<UserRow, EngineError> {
        let display_name = display_name.trim();
        check("displayName", validate_display_name(display_name))?;

        let user = UserRow {
            id: new_id(),
            display_name: display_name.to_string(),
            presence: Presence::Offline.as_str().to_string(),
            avatar_url: None,
            is_bot: false,
            created_at: now_timestamp(),
        };
        users::create_user(self.pool(), &user).await?;
        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<UserRow, EngineError> {
        users::get_user(self.pool(), user_id)
            .await?
            .ok_or(EngineError::NotFound("user"))
    }

    /// Update the principal's own profile. Emits one user `Updated` event per
    /// server the user belongs to.
    pub async fn update_user(
        &self,
        principal: &str,
        patch: UserPatch,
    ) -> Result<UserRow, EngineError> {
        let display_name = match patch.display_name {
            Patch::Set(name) => {
                let name = name.trim().to_string();
                check("displayName", validate_display_name(&name))?;
                Patch::Set(name)
            }
            Patch::Unset => Patch::Unset,
        };
        if patch.presence == Patch::Set(Presence::Offline) {
            return Err(EngineError::invalid(
                "presence",
                "offline is derived from connections; use invisible instead",
            ));
        }
        let avatar_url = image_patch("avatarUrl", patch.avatar_url)?;

        let _user_guard = self.lock_user(principal).await;
        let current = self.get_user(principal).await?;
        let presence = match patch.presence {
            Patch::Set(p) => desired_presence(p, self.registry().live_sessions(principal)),
            Patch::Unset => Presence::parse(&current.presence).unwrap_or(Presence::Offline),
        };
        let profile = Profile {
            display_name: display_name.apply(current.display_name.clone()),
            avatar_url: avatar_url.apply(current.avatar_url.clone()),
            presence,
        };

        if profile.matches(&current) {
            return Ok(current);
        }
        self.write_profile(principal, &profile).await
    }

    /// Recompute presence from the live session count and publish it when
    /// it changes. Returns the new profile, or `None` when nothing changed.
    pub async fn refresh_presence(&self, user_id: &str) -> Result<Option<UserRow>, EngineError> {
        let _user_guard = self.lock_user(user_id).await;
        let Some(user) = users::get_user(self.pool(), user_id).await? else {
            return Ok(None);
        };
        let current = Presence::parse(&user.presence).unwrap_or(Presence::Offline);
        let desired = desired_presence(current, self.registry().live_sessions(user_id));
        if desired == current {
            return Ok(None);
        }
        debug!(%user_id, from = current.as_str(), to = desired.as_str(), "presence changed");
        let profile = Profile {
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            presence: desired,
        };
        let updated = self.write_profile(user_id, &profile).await?;
        Ok(Some(updated))
    }

    /// Persist a profile and fan it out to every server the user is in.
    /// The caller holds the user lock; server locks are taken here in sorted
    /// order so the update lands in each server's stream at commit position.
    pub(crate) async fn write_profile(
        &self,
        user_id: &str,
        profile: &Profile,
    ) -> Result<UserRow, EngineError> {
        let server_ids = members::list_server_ids_for_user(self.pool(), user_id).await?;
        let _server_guards = self.lock_servers(&server_ids).await;
        let presence = profile.presence;

        let mut tx = self.pool().begin().await?;
        if !users::update_profile(
            &mut *tx,
            user_id,
            &profile.display_name,
            profile.avatar_url.as_deref(),
            presence.as_str(),
        )
        .await?
        {
            return Err(EngineError::NotFound("user"));
        }
        let updated = users::get_user(&mut *tx, user_id)
            .await?
            .ok_or(EngineError::NotFound("user"))?;
        tx.commit().await?;

        for server_id in &server_ids {
            self.publish(DomainEvent::user(server_id.clone(), updated.clone()))
                .await;
        }
        info!(%user_id, presence = presence.as_str(), servers = server_ids.len(), "user updated");
        Ok(updated)
    }
}
