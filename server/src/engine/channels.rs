use serde::Deserialize;
use tracing::info;

use super::chat_engine::{ChatEngine, ServerContext};
use super::error::{EngineError, check};
use super::events::{DomainEvent, Operation};
use super::ids::{new_id, now_timestamp};
use super::patch::Patch;
use super::permissions::Action;
use super::servers::normalize_description;
use super::validation::validate_channel_name;
use crate::db::models::ChannelRow;
use crate::db::queries::channels;

/// Partial channel update. Moving a channel shifts the ones in between so
/// positions stay dense.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPatch {
    #[serde(default)]
    pub name: Patch<String>,
    #[serde(default)]
    pub description: Patch<Option<String>>,
    #[serde(default)]
    pub position: Patch<i64>,
}

fn validated_name(name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    check("name", validate_channel_name(name))?;
    Ok(name.to_string())
}

impl ChatEngine {
    /// Load a channel and its server context. A channel in a server the
    /// principal cannot see is reported as missing.
    pub(crate) async fn channel_context(
        &self,
        principal: &str,
        channel_id: &str,
    ) -> Result<(ChannelRow, ServerContext), EngineError> {
        let channel = channels::get_channel(self.pool(), channel_id)
            .await?
            .ok_or(EngineError::NotFound("channel"))?;
        let ctx = match self.load_context(&channel.server_id, principal).await {
            Ok(ctx) => ctx,
            Err(EngineError::NotFound(_)) => return Err(EngineError::NotFound("channel")),
            Err(e) => return Err(e),
        };
        Ok((channel, ctx))
    }

    /// Server owning a channel, read without locking. Mutations lock the
    /// returned server and then reload the channel.
    pub(crate) async fn server_of_channel(&self, channel_id: &str) -> Result<String, EngineError> {
        channels::get_channel(self.pool(), channel_id)
            .await?
            .map(|c| c.server_id)
            .ok_or(EngineError::NotFound("channel"))
    }

    /// Create a channel at the end of the server's channel list.
    pub async fn create_channel(
        &self,
        principal: &str,
        server_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<ChannelRow, EngineError> {
        let name = validated_name(name)?;
        let description = normalize_description(description)?;

        let _guard = self.lock_server(server_id).await;
        let ctx = self.load_context(server_id, principal).await?;
        Self::authorize(&ctx, principal, Action::ManageChannels)?;

        if channels::name_taken(self.pool(), server_id, &name, None).await? {
            return Err(EngineError::Conflict(format!("channel '{name}' already exists")));
        }
        let position = channels::count_channels(self.pool(), server_id).await?;
        let channel = ChannelRow {
            id: new_id(),
            server_id: server_id.to_string(),
            name,
            description,
            position,
            created_at: now_timestamp(),
        };

        let mut tx = self.pool().begin().await?;
        channels::create_channel(&mut *tx, &channel).await?;
        tx.commit().await?;

        self.publish(DomainEvent::channel(Operation::Created, channel.clone()))
            .await;
        info!(%server_id, channel_id = %channel.id, position, "channel created");
        Ok(channel)
    }

    pub async fn get_channel(&self, principal: &str, channel_id: &str) -> Result<ChannelRow, EngineError> {
        Ok(self.channel_context(principal, channel_id).await?.0)
    }

    /// Channels of a server in position order.
    pub async fn list_channels(
        &self,
        principal: &str,
        server_id: &str,
    ) -> Result<Vec<ChannelRow>, EngineError> {
        let ctx = self.load_context(server_id, principal).await?;
        Self::authorize(&ctx, principal, Action::ViewServer)?;
        Ok(channels::list_channels(self.pool(), server_id).await?)
    }

    pub async fn update_channel(
        &self,
        principal: &str,
        channel_id: &str,
        patch: ChannelPatch,
    ) -> Result<ChannelRow, EngineError> {
        let name = match patch.name {
            Patch::Set(name) => Patch::Set(validated_name(&name)?),
            Patch::Unset => Patch::Unset,
        };
        let description = match patch.description {
            Patch::Set(d) => Patch::Set(normalize_description(d.as_deref())?),
            Patch::Unset => Patch::Unset,
        };

        let server_id = self.server_of_channel(channel_id).await?;
        let _guard = self.lock_server(&server_id).await;
        let (channel, ctx) = self.channel_context(principal, channel_id).await?;
        Self::authorize(&ctx, principal, Action::ManageChannels)?;

        let name = name.apply(channel.name.clone());
        let description = description.apply(channel.description.clone());
        let position = patch.position.apply(channel.position);

        if name != channel.name
            && channels::name_taken(self.pool(), &server_id, &name, Some(channel_id)).await?
        {
            return Err(EngineError::Conflict(format!("channel '{name}' already exists")));
        }
        let count = channels::count_channels(self.pool(), &server_id).await?;
        if !(0..count).contains(&position) {
            return Err(EngineError::invalid(
                "position",
                format!("position must be between 0 and {}", count - 1),
            ));
        }
        if name == channel.name && description == channel.description && position == channel.position {
            return Ok(channel);
        }

        let mut tx = self.pool().begin().await?;
        channels::update_details(&mut *tx, channel_id, &name, description.as_deref()).await?;
        if position < channel.position {
            channels::shift_positions(&mut *tx, &server_id, position, channel.position - 1, 1).await?;
        } else if position > channel.position {
            channels::shift_positions(&mut *tx, &server_id, channel.position + 1, position, -1).await?;
        }
        channels::set_position(&mut *tx, channel_id, position).await?;
        let updated = channels::get_channel(&mut *tx, channel_id)
            .await?
            .ok_or(EngineError::NotFound("channel"))?;
        tx.commit().await?;

        self.publish(DomainEvent::channel(Operation::Updated, updated.clone()))
            .await;
        info!(%server_id, %channel_id, position, "channel updated");
        Ok(updated)
    }

    /// Delete a channel and its messages; later channels move up by one.
    pub async fn delete_channel(&self, principal: &str, channel_id: &str) -> Result<ChannelRow, EngineError> {
        let server_id = self.server_of_channel(channel_id).await?;
        let _guard = self.lock_server(&server_id).await;
        let (channel, ctx) = self.channel_context(principal, channel_id).await?;
        Self::authorize(&ctx, principal, Action::ManageChannels)?;

        let mut tx = self.pool().begin().await?;
        if !channels::delete_channel(&mut *tx, channel_id).await? {
            return Err(EngineError::NotFound("channel"));
        }
        channels::shift_positions(&mut *tx, &server_id, channel.position + 1, i64::MAX, -1).await?;
        tx.commit().await?;

        self.publish(DomainEvent::channel(Operation::Deleted, channel.clone()))
            .await;
        info!(%server_id, %channel_id, "channel deleted");
        Ok(channel)
    }
}
