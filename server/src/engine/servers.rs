use serde::Deserialize;
use tracing::info;

use super::chat_engine::ChatEngine;
use super::error::{EngineError, check};
use super::events::{DomainEvent, Operation};
use super::ids::{new_id, now_timestamp};
use super::patch::Patch;
use super::permissions::{Action, Roles};
use super::validation::{validate_description, validate_image_url, validate_server_name};
use crate::db::models::{ChannelRow, ServerRow};
use crate::db::queries::{channels, members, servers, users};

/// Name of the channel every new server starts with.
pub const DEFAULT_CHANNEL_NAME: &str = "general";

/// Partial server update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPatch {
    #[serde(default)]
    pub name: Patch<String>,
    #[serde(default)]
    pub description: Patch<Option<String>>,
    #[serde(default)]
    pub icon_url: Patch<Option<String>>,
    #[serde(default)]
    pub banner_url: Patch<Option<String>>,
}

/// Trim a description; blank means none.
pub(crate) fn normalize_description(
    description: Option<&str>,
) -> Result<Option<String>, EngineError> {
    let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    check("description", validate_description(description))?;
    Ok(Some(description.to_string()))
}

/// Trim an image URL; blank means none.
pub(crate) fn normalize_image_url(
    field: &'static str,
    url: Option<&str>,
) -> Result<Option<String>, EngineError> {
    let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    check(field, validate_image_url(url))?;
    Ok(Some(url.to_string()))
}

/// Validate the URL carried by an image patch.
pub(crate) fn image_patch(
    field: &'static str,
    patch: Patch<Option<String>>,
) -> Result<Patch<Option<String>>, EngineError> {
    Ok(match patch {
        Patch::Set(url) => Patch::Set(normalize_image_url(field, url.as_deref())?),
        Patch::Unset => Patch::Unset,
    })
}

impl ChatEngine {
    /// Create a server owned by the principal, together with the owner's
    /// membership and the default channel, in one transaction.
    pub async fn create_server(
        &self,
        principal: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<ServerRow, EngineError> {
        let name = name.trim();
        check("name", validate_server_name(name))?;
        let description = normalize_description(description)?;
        if !users::is_active(self.pool(), principal).await? {
            return Err(EngineError::NotFound("user"));
        }

        let now = now_timestamp();
        let server = ServerRow {
            id: new_id(),
            owner_id: principal.to_string(),
            name: name.to_string(),
            description,
            icon_url: None,
            banner_url: None,
            created_at: now.clone(),
        };
        let general = ChannelRow {
            id: new_id(),
            server_id: server.id.clone(),
            name: DEFAULT_CHANNEL_NAME.to_string(),
            description: None,
            position: 0,
            created_at: now.clone(),
        };

        let _guard = self.lock_server(&server.id).await;
        let mut tx = self.pool().begin().await?;
        servers::create_server(&mut *tx, &server).await?;
        members::add_member(&mut *tx, &server.id, principal, &Roles::OWNER.to_column(), &now)
            .await?;
        channels::create_channel(&mut *tx, &general).await?;
        tx.commit().await?;

        self.publish(DomainEvent::server(Operation::Created, server.clone()))
            .await;
        info!(server_id = %server.id, owner_id = %principal, "server created");
        Ok(server)
    }

    pub async fn get_server(&self, principal: &str, server_id: &str) -> Result<ServerRow, EngineError> {
        Ok(self.load_context(server_id, principal).await?.server)
    }

    /// Servers the principal belongs to.
    pub async fn list_servers_for_user(&self, principal: &str) -> Result<Vec<ServerRow>, EngineError> {
        Ok(servers::list_servers_for_user(self.pool(), principal).await?)
    }

    pub async fn update_server(
        &self,
        principal: &str,
        server_id: &str,
        patch: ServerPatch,
    ) -> Result<ServerRow, EngineError> {
        let name = match patch.name {
            Patch::Set(name) => {
                let name = name.trim().to_string();
                check("name", validate_server_name(&name))?;
                Patch::Set(name)
            }
            Patch::Unset => Patch::Unset,
        };
        let description = match patch.description {
            Patch::Set(d) => Patch::Set(normalize_description(d.as_deref())?),
            Patch::Unset => Patch::Unset,
        };
        let icon_url = image_patch("iconUrl", patch.icon_url)?;
        let banner_url = image_patch("bannerUrl", patch.banner_url)?;

        let _guard = self.lock_server(server_id).await;
        let ctx = self.load_context(server_id, principal).await?;
        Self::authorize(&ctx, principal, Action::ManageServer)?;

        let edited = ServerRow {
            name: name.apply(ctx.server.name.clone()),
            description: description.apply(ctx.server.description.clone()),
            icon_url: icon_url.apply(ctx.server.icon_url.clone()),
            banner_url: banner_url.apply(ctx.server.banner_url.clone()),
            ..ctx.server.clone()
        };
        if edited == ctx.server {
            return Ok(ctx.server);
        }

        let mut tx = self.pool().begin().await?;
        servers::update_server(&mut *tx, &edited).await?;
        let updated = servers::get_server(&mut *tx, server_id)
            .await?
            .ok_or(EngineError::NotFound("server"))?;
        tx.commit().await?;

        self.publish(DomainEvent::server(Operation::Updated, updated.clone()))
            .await;
        info!(%server_id, "server updated");
        Ok(updated)
    }

    /// Delete a server and everything in it. Returns the last snapshot.
    pub async fn delete_server(&self, principal: &str, server_id: &str) -> Result<ServerRow, EngineError> {
        let _guard = self.lock_server(server_id).await;
        let ctx = self.load_context(server_id, principal).await?;
        Self::authorize(&ctx, principal, Action::DeleteServer)?;

        let mut tx = self.pool().begin().await?;
        if !servers::delete_server(&mut *tx, server_id).await? {
            return Err(EngineError::NotFound("server"));
        }
        tx.commit().await?;

        self.publish(DomainEvent::server(Operation::Deleted, ctx.server.clone()))
            .await;
        info!(%server_id, "server deleted");
        Ok(ctx.server)
    }

    /// Hand the server to another member. The new owner gets the owner tag,
    /// the previous owner stays on as an admin.
    pub async fn transfer_ownership(
        &self,
        principal: &str,
        server_id: &str,
        new_owner_id: &str,
    ) -> Result<ServerRow, EngineError> {
        let _guard = self.lock_server(server_id).await;
        let ctx = self.load_context(server_id, principal).await?;
        Self::authorize(&ctx, principal, Action::TransferOwnership)?;

        if new_owner_id == ctx.server.owner_id {
            return Err(EngineError::Conflict("user already owns this server".into()));
        }
        if members::get_member(self.pool(), server_id, new_owner_id)
            .await?
            .is_none()
        {
            return Err(EngineError::NotFound("member"));
        }

        let previous_owner = ctx.server.owner_id.clone();
        let mut tx = self.pool().begin().await?;
        servers::set_owner(&mut *tx, server_id, new_owner_id).await?;
        members::set_roles(&mut *tx, server_id, new_owner_id, &Roles::OWNER.to_column()).await?;
        members::set_roles(&mut *tx, server_id, &previous_owner, &Roles::ADMIN.to_column()).await?;
        let updated = servers::get_server(&mut *tx, server_id)
            .await?
            .ok_or(EngineError::NotFound("server"))?;
        tx.commit().await?;

        self.publish(DomainEvent::server(Operation::Updated, updated.clone()))
            .await;
        info!(%server_id, from = %previous_owner, to = %new_owner_id, "ownership transferred");
        Ok(updated)
    }
}
