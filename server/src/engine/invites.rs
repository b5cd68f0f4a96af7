use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::chat_engine::ChatEngine;
use super::error::{EngineError, check};
use super::events::{DomainEvent, Operation};
use super::ids::{new_invite_code, normalize_invite_code, now_timestamp};
use super::permissions::{Action, Roles};
use super::validation::validate_max_uses;
use crate::db::models::{InviteRow, MemberRow};
use crate::db::queries::{invites, members, servers, users};

/// Fresh codes tried before giving up on a collision streak.
const MAX_CODE_ATTEMPTS: usize = 5;

/// What anyone holding an invite code may learn before joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitePreview {
    pub code: String,
    pub server_id: String,
    pub server_name: String,
    pub server_description: Option<String>,
    pub uses: i64,
    pub max_uses: Option<i64>,
    pub expires_at: Option<String>,
}

fn is_expired(invite: &InviteRow, now: DateTime<Utc>) -> bool {
    invite
        .expires_at
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .is_some_and(|expires| expires <= now)
}

fn is_exhausted(invite: &InviteRow) -> bool {
    invite.max_uses.is_some_and(|max| invite.uses >= max)
}

/// Reject invites that can no longer be redeemed.
fn ensure_usable(invite: &InviteRow) -> Result<(), EngineError> {
    if is_expired(invite, Utc::now()) {
        return Err(EngineError::Conflict("invite has expired".into()));
    }
    if is_exhausted(invite) {
        return Err(EngineError::Conflict("invite has reached its maximum uses".into()));
    }
    Ok(())
}

impl ChatEngine {
    /// Create an invite to a server. `max_uses` must be at least 1 and
    /// `expires_at` in the future when given.
    pub async fn create_invite(
        &self,
        principal: &str,
        server_id: &str,
        max_uses: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<InviteRow, EngineError> {
        if let Some(max) = max_uses {
            check("maxUses", validate_max_uses(max))?;
        }
        if let Some(expires) = expires_at
            && expires <= Utc::now()
        {
            return Err(EngineError::invalid("expiresAt", "expiry must be in the future"));
        }

        let _guard = self.lock_server(server_id).await;
        let ctx = self.load_context(server_id, principal).await?;
        Self::authorize(&ctx, principal, Action::CreateInvites)?;

        let mut invite = InviteRow {
            code: String::new(),
            server_id: server_id.to_string(),
            creator_id: principal.to_string(),
            uses: 0,
            max_uses,
            expires_at: expires_at.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            created_at: now_timestamp(),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            invite.code = new_invite_code();
            let mut tx = self.pool().begin().await?;
            match invites::create_invite(&mut *tx, &invite).await {
                Ok(()) => {
                    tx.commit().await?;
                    break;
                }
                Err(sqlx::Error::Database(e))
                    if e.is_unique_violation() && attempt < MAX_CODE_ATTEMPTS =>
                {
                    warn!(attempt, "invite code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.publish(DomainEvent::invite(Operation::Created, invite.clone()))
            .await;
        info!(%server_id, code = %invite.code, "invite created");
        Ok(invite)
    }

    /// Public lookup by code. Unusable invites are reported as such.
    pub async fn preview_invite(&self, code: &str) -> Result<InvitePreview, EngineError> {
        let code = normalize_invite_code(code);
        let invite = invites::get_invite(self.pool(), &code)
            .await?
            .ok_or(EngineError::NotFound("invite"))?;
        ensure_usable(&invite)?;
        let server = servers::get_server(self.pool(), &invite.server_id)
            .await?
            .ok_or(EngineError::NotFound("invite"))?;
        Ok(InvitePreview {
            code: invite.code,
            server_id: server.id,
            server_name: server.name,
            server_description: server.description,
            uses: invite.uses,
            max_uses: invite.max_uses,
            expires_at: invite.expires_at,
        })
    }

    /// Every member can see the server's invites; the same rows reach them
    /// as invite events. Creating and revoking stay privileged.
    pub async fn list_invites(&self, principal: &str, server_id: &str) -> Result<Vec<InviteRow>, EngineError> {
        let ctx = self.load_context(server_id, principal).await?;
        Self::authorize(&ctx, principal, Action::ViewServer)?;
        Ok(invites::list_server_invites(self.pool(), server_id).await?)
    }

    /// Delete an invite. Returns its last snapshot.
    pub async fn revoke_invite(&self, principal: &str, code: &str) -> Result<InviteRow, EngineError> {
        let code = normalize_invite_code(code);
        let server_id = invites::get_invite(self.pool(), &code)
            .await?
            .map(|i| i.server_id)
            .ok_or(EngineError::NotFound("invite"))?;

        let _guard = self.lock_server(&server_id).await;
        let invite = invites::get_invite(self.pool(), &code)
            .await?
            .ok_or(EngineError::NotFound("invite"))?;
        let ctx = match self.load_context(&server_id, principal).await {
            Ok(ctx) => ctx,
            Err(EngineError::NotFound(_)) => return Err(EngineError::NotFound("invite")),
            Err(e) => return Err(e),
        };
        Self::authorize(&ctx, principal, Action::ManageInvites)?;

        let mut tx = self.pool().begin().await?;
        if !invites::delete_invite(&mut *tx, &code).await? {
            return Err(EngineError::NotFound("invite"));
        }
        tx.commit().await?;

        self.publish(DomainEvent::invite(Operation::Deleted, invite.clone()))
            .await;
        info!(%server_id, %code, "invite revoked");
        Ok(invite)
    }

    /// Join a server through an invite. Taking a use and inserting the
    /// membership commit together; an exhausted invite is a `Conflict`.
    pub async fn redeem_invite(&self, principal: &str, code: &str) -> Result<MemberRow, EngineError> {
        let code = normalize_invite_code(code);
        let server_id = invites::get_invite(self.pool(), &code)
            .await?
            .map(|i| i.server_id)
            .ok_or(EngineError::NotFound("invite"))?;
        if !users::is_active(self.pool(), principal).await? {
            return Err(EngineError::NotFound("user"));
        }

        let _guard = self.lock_server(&server_id).await;
        let invite = invites::get_invite(self.pool(), &code)
            .await?
            .ok_or(EngineError::NotFound("invite"))?;
        if is_expired(&invite, Utc::now()) {
            return Err(EngineError::Conflict("invite has expired".into()));
        }
        let server = servers::get_server(self.pool(), &server_id)
            .await?
            .ok_or(EngineError::NotFound("invite"))?;
        if server.owner_id == principal
            || members::get_member(self.pool(), &server_id, principal)
                .await?
                .is_some()
        {
            return Err(EngineError::Conflict("already a member of this server".into()));
        }

        let mut tx = self.pool().begin().await?;
        if !invites::consume_use(&mut *tx, &code).await? {
            return Err(EngineError::Conflict("invite has reached its maximum uses".into()));
        }
        let joined_at = now_timestamp();
        if !members::add_member(&mut *tx, &server_id, principal, &Roles::empty().to_column(), &joined_at)
            .await?
        {
            return Err(EngineError::Conflict("already a member of this server".into()));
        }
        let member = members::get_member(&mut *tx, &server_id, principal)
            .await?
            .ok_or(EngineError::NotFound("member"))?;
        tx.commit().await?;

        self.publish(DomainEvent::membership(Operation::Created, member.clone()))
            .await;
        info!(%server_id, user_id = %principal, %code, "invite redeemed");
        Ok(member)
    }
}
