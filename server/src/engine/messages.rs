use serde::Serialize;
use tracing::{debug, info};

use super::chat_engine::{ChatEngine, ServerContext};
use super::error::{EngineError, check};
use super::events::{DomainEvent, Operation};
use super::ids::{new_id, now_timestamp};
use super::permissions::{Action, can_delete_message};
use super::validation::{validate_message, validate_nonce};
use crate::db::models::MessageRow;
use crate::db::queries::messages;

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// One page of channel history, oldest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHistory {
    pub messages: Vec<MessageRow>,
    /// Older messages exist before the first one returned.
    pub has_more: bool,
}

impl ChatEngine {
    /// Load a message and its server context, hiding messages in servers
    /// the principal cannot see.
    async fn message_context(
        &self,
        principal: &str,
        message_id: &str,
    ) -> Result<(MessageRow, ServerContext), EngineError> {
        let message = messages::get_message(self.pool(), message_id)
            .await?
            .ok_or(EngineError::NotFound("message"))?;
        let ctx = match self.load_context(&message.server_id, principal).await {
            Ok(ctx) => ctx,
            Err(EngineError::NotFound(_)) => return Err(EngineError::NotFound("message")),
            Err(e) => return Err(e),
        };
        Ok((message, ctx))
    }

    async fn server_of_message(&self, message_id: &str) -> Result<String, EngineError> {
        messages::get_message(self.pool(), message_id)
            .await?
            .map(|m| m.server_id)
            .ok_or(EngineError::NotFound("message"))
    }

    pub async fn post_message(
        &self,
        principal: &str,
        channel_id: &str,
        content: &str,
    ) -> Result<MessageRow, EngineError> {
        self.post_message_with_nonce(principal, channel_id, content, None)
            .await
    }

    /// Post a message carrying a client nonce. The nonce is stored and
    /// echoed in the response and the `Created` event so the sender can match
    /// its optimistic copy; it is not checked for uniqueness.
    pub async fn post_message_with_nonce(
        &self,
        principal: &str,
        channel_id: &str,
        content: &str,
        nonce: Option<&str>,
    ) -> Result<MessageRow, EngineError> {
        check("content", validate_message(content))?;
        if let Some(nonce) = nonce {
            check("nonce", validate_nonce(nonce))?;
        }

        let server_id = self.server_of_channel(channel_id).await?;
        let _guard = self.lock_server(&server_id).await;
        let (channel, ctx) = self.channel_context(principal, channel_id).await?;
        Self::authorize(&ctx, principal, Action::SendMessages)?;

        let message = MessageRow {
            id: new_id(),
            channel_id: channel.id,
            server_id: channel.server_id,
            author_id: principal.to_string(),
            content: content.to_string(),
            nonce: nonce.map(str::to_string),
            created_at: now_timestamp(),
            edited_at: None,
        };
        let mut tx = self.pool().begin().await?;
        messages::insert_message(&mut *tx, &message).await?;
        tx.commit().await?;

        self.publish(DomainEvent::message(Operation::Created, message.clone()))
            .await;
        debug!(%server_id, %channel_id, message_id = %message.id, "message posted");
        Ok(message)
    }

    pub async fn get_message(&self, principal: &str, message_id: &str) -> Result<MessageRow, EngineError> {
        let (message, ctx) = self.message_context(principal, message_id).await?;
        Self::authorize(&ctx, principal, Action::ViewServer)?;
        Ok(message)
    }

    /// Replace a message's content. Only its author may edit it.
    pub async fn edit_message(
        &self,
        principal: &str,
        message_id: &str,
        content: &str,
    ) -> Result<MessageRow, EngineError> {
        check("content", validate_message(content))?;

        let server_id = self.server_of_message(message_id).await?;
        let _guard = self.lock_server(&server_id).await;
        let (message, _ctx) = self.message_context(principal, message_id).await?;
        if message.author_id != principal {
            return Err(EngineError::Forbidden("only the author can edit a message"));
        }
        if message.content == content {
            return Ok(message);
        }

        let mut tx = self.pool().begin().await?;
        if !messages::update_content(&mut *tx, message_id, content, &now_timestamp()).await? {
            return Err(EngineError::NotFound("message"));
        }
        let updated = messages::get_message(&mut *tx, message_id)
            .await?
            .ok_or(EngineError::NotFound("message"))?;
        tx.commit().await?;

        self.publish(DomainEvent::message(Operation::Updated, updated.clone()))
            .await;
        debug!(%server_id, %message_id, "message edited");
        Ok(updated)
    }

    /// Delete a message: its author, or anyone allowed to manage messages.
    pub async fn delete_message(&self, principal: &str, message_id: &str) -> Result<MessageRow, EngineError> {
        let server_id = self.server_of_message(message_id).await?;
        let _guard = self.lock_server(&server_id).await;
        let (message, ctx) = self.message_context(principal, message_id).await?;
        if !can_delete_message(principal, &message.author_id, &ctx.access()) {
            return Err(EngineError::Forbidden(Action::ManageMessages.describe()));
        }

        let mut tx = self.pool().begin().await?;
        if !messages::delete_message(&mut *tx, message_id).await? {
            return Err(EngineError::NotFound("message"));
        }
        tx.commit().await?;

        self.publish(DomainEvent::message(Operation::Deleted, message.clone()))
            .await;
        info!(%server_id, %message_id, by = %principal, "message deleted");
        Ok(message)
    }

    /// A page of history older than `before` (exclusive), oldest first.
    pub async fn message_history(
        &self,
        principal: &str,
        channel_id: &str,
        before: Option<&str>,
        limit: Option<i64>,
    ) -> Result<MessageHistory, EngineError> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit < 1 {
            return Err(EngineError::invalid("limit", "limit must be at least 1"));
        }
        let limit = limit.min(MAX_HISTORY_LIMIT);

        let (_, ctx) = self.channel_context(principal, channel_id).await?;
        Self::authorize(&ctx, principal, Action::ViewServer)?;

        // One extra row tells whether another page exists.
        let mut page = messages::fetch_history(self.pool(), channel_id, before, limit + 1).await?;
        let has_more = page.len() as i64 > limit;
        page.truncate(limit as usize);
        page.reverse();
        Ok(MessageHistory {
            messages: page,
            has_more,
        })
    }
}
