use tracing::info;

use super::chat_engine::ChatEngine;
use super::error::EngineError;
use super::events::{DomainEvent, Operation};
use super::permissions::{Action, Roles, can_kick};
use crate::db::models::MemberRow;
use crate::db::queries::members;

/// Parse role tags supplied by a client. Only `admin` can be granted; the
/// owner tag moves with ownership.
fn parse_grantable_roles(tags: &[String]) -> Result<Roles, EngineError> {
    let mut roles = Roles::empty();
    for tag in tags {
        match tag.trim().to_ascii_lowercase().as_str() {
            "admin" => roles |= Roles::ADMIN,
            "owner" => {
                return Err(EngineError::invalid(
                    "roles",
                    "the owner tag is granted by transferring ownership",
                ));
            }
            other => {
                return Err(EngineError::invalid(
                    "roles",
                    format!("unknown role '{other}'"),
                ));
            }
        }
    }
    Ok(roles)
}

impl ChatEngine {
    pub async fn list_members(
        &self,
        principal: &str,
        server_id: &str,
    ) -> Result<Vec<MemberRow>, EngineError> {
        let ctx = self.load_context(server_id, principal).await?;
        Self::authorize(&ctx, principal, Action::ViewServer)?;
        Ok(members::list_members(self.pool(), server_id).await?)
    }

    /// Replace a member's role tags.
    pub async fn update_member_roles(
        &self,
        principal: &str,
        server_id: &str,
        user_id: &str,
        roles: &[String],
    ) -> Result<MemberRow, EngineError> {
        let roles = parse_grantable_roles(roles)?;

        let _guard = self.lock_server(server_id).await;
        let ctx = self.load_context(server_id, principal).await?;
        Self::authorize(&ctx, principal, Action::ManageRoles)?;

        if user_id == ctx.server.owner_id {
            return Err(EngineError::Conflict("the owner's roles cannot be changed".into()));
        }
        let member = members::get_member(self.pool(), server_id, user_id)
            .await?
            .ok_or(EngineError::NotFound("member"))?;
        let column = roles.to_column();
        if member.roles == column {
            return Ok(member);
        }

        let mut tx = self.pool().begin().await?;
        members::set_roles(&mut *tx, server_id, user_id, &column).await?;
        let updated = members::get_member(&mut *tx, server_id, user_id)
            .await?
            .ok_or(EngineError::NotFound("member"))?;
        tx.commit().await?;

        self.publish(DomainEvent::membership(Operation::Updated, updated.clone()))
            .await;
        info!(%server_id, %user_id, roles = %column, "member roles updated");
        Ok(updated)
    }

    /// Remove another member. Returns the removed membership.
    pub async fn kick_member(
        &self,
        principal: &str,
        server_id: &str,
        user_id: &str,
    ) -> Result<MemberRow, EngineError> {
        let _guard = self.lock_server(server_id).await;
        let ctx = self.load_context(server_id, principal).await?;
        Self::authorize(&ctx, principal, Action::KickMembers)?;

        let member = members::get_member(self.pool(), server_id, user_id)
            .await?
            .ok_or(EngineError::NotFound("member"))?;
        let target_roles = Roles::from_column(&member.roles);
        if !can_kick(principal, user_id, target_roles, &ctx.access()) {
            return Err(EngineError::Forbidden(Action::KickMembers.describe()));
        }

        self.remove_membership(member, "member kicked").await
    }

    /// The principal leaves a server. The owner has to transfer it first.
    pub async fn leave_server(&self, principal: &str, server_id: &str) -> Result<MemberRow, EngineError> {
        let _guard = self.lock_server(server_id).await;
        let ctx = self.load_context(server_id, principal).await?;
        if principal == ctx.server.owner_id {
            return Err(EngineError::Conflict(
                "the owner cannot leave; transfer ownership first".into(),
            ));
        }
        let member = ctx.membership.ok_or(EngineError::NotFound("member"))?;
        self.remove_membership(member, "member left").await
    }

    /// Delete a membership and announce it. The caller holds the server lock.
    async fn remove_membership(&self, member: MemberRow, what: &str) -> Result<MemberRow, EngineError> {
        let mut tx = self.pool().begin().await?;
        if !members::remove_member(&mut *tx, &member.server_id, &member.user_id).await? {
            return Err(EngineError::NotFound("member"));
        }
        tx.commit().await?;

        self.publish(DomainEvent::membership(Operation::Deleted, member.clone()))
            .await;
        info!(server_id = %member.server_id, user_id = %member.user_id, "{what}");
        Ok(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::chat_engine::testing::*;
    use crate::engine::events::{EntityKind, Resource};

    #[test]
    fn test_parse_grantable_roles() {
        assert_eq!(parse_grantable_roles(&[]).unwrap(), Roles::empty());
        assert_eq!(
            parse_grantable_roles(&[" Admin ".into()]).unwrap(),
            Roles::ADMIN
        );
        assert!(parse_grantable_roles(&["owner".into()]).is_err());
        assert!(parse_grantable_roles(&["moderator".into()]).is_err());
    }

    #[tokio::test]
    async fn test_list_members_requires_membership() {
        let engine = engine().await;
        let alice = user(&engine, "alice").await;
        let bob = user(&engine, "bob").await;
        let mallory = user(&engine, "mallory").await;
        let server = server_with(&engine, &alice, &[&bob]).await;

        let list = engine.list_members(&bob, &server.id).await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(matches!(
            engine.list_members(&mallory, &server.id).await,
            Err(EngineError::NotFound("server"))
        ));
    }

    #[tokio::test]
    async fn test_only_owner_changes_roles() {
        let engine = engine().await;
        let alice = user(&engine, "alice").await;
        let bob = user(&engine, "bob").await;
        let carol = user(&engine, "carol").await;
        let server = server_with(&engine, &alice, &[&bob, &carol]).await;
        let admin = vec!["admin".to_string()];

        let member = engine
            .update_member_roles(&alice, &server.id, &bob, &admin)
            .await
            .unwrap();
        assert_eq!(member.roles, "admin");

        // Admins cannot hand out roles.
        let err = engine
            .update_member_roles(&bob, &server.id, &carol, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let err = engine
            .update_member_roles(&alice, &server.id, &alice, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        let err = engine
            .update_member_roles(&alice, &server.id, "nobody", &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound("member")));
    }

    #[tokio::test]
    async fn test_kick_rules() {
        let engine = engine().await;
        let alice = user(&engine, "alice").await;
        let admin = user(&engine, "admin").await;
        let admin2 = user(&engine, "admin2").await;
        let bob = user(&engine, "bob").await;
        let carol = user(&engine, "carol").await;
        let server = server_with(&engine, &alice, &[&admin, &admin2, &bob, &carol]).await;
        let tag = vec!["admin".to_string()];
        engine
            .update_member_roles(&alice, &server.id, &admin, &tag)
            .await
            .unwrap();
        engine
            .update_member_roles(&alice, &server.id, &admin2, &tag)
            .await
            .unwrap();

        // Plain members cannot kick.
        let err = engine.kick_member(&bob, &server.id, &carol).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        // Admins cannot kick the owner or other admins.
        let err = engine.kick_member(&admin, &server.id, &alice).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        let err = engine
            .kick_member(&admin, &server.id, &admin2)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let removed = engine.kick_member(&admin, &server.id, &bob).await.unwrap();
        assert_eq!(removed.user_id, bob);
        assert!(matches!(
            engine.list_members(&bob, &server.id).await,
            Err(EngineError::NotFound("server"))
        ));

        // The owner may kick an admin.
        engine.kick_member(&alice, &server.id, &admin2).await.unwrap();
        let err = engine.kick_member(&alice, &server.id, &bob).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound("member")));
    }

    #[tokio::test]
    async fn test_leave_server() {
        let engine = engine().await;
        let alice = user(&engine, "alice").await;
        let bob = user(&engine, "bob").await;
        let server = server_with(&engine, &alice, &[&bob]).await;

        let err = engine.leave_server(&alice, &server.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        engine.leave_server(&bob, &server.id).await.unwrap();
        assert!(matches!(
            engine.leave_server(&bob, &server.id).await,
            Err(EngineError::NotFound("server"))
        ));
    }

    #[tokio::test]
    async fn test_kicked_member_sees_removal_then_nothing() {
        let engine = engine().await;
        let alice = user(&engine, "alice").await;
        let bob = user(&engine, "bob").await;
        let server = server_with(&engine, &alice, &[&bob]).await;

        let (session, mut rx) = engine.open_session();
        engine
            .authenticate_session(session, &token_for(&bob))
            .await
            .unwrap();

        engine.kick_member(&alice, &server.id, &bob).await.unwrap();
        let event = next_event_where(&mut rx, |e| {
            e.entity_kind == EntityKind::Membership && e.operation == Operation::Deleted
        })
        .await;
        assert!(matches!(&event.resource, Resource::Membership(m) if m.user_id == bob));

        // Nothing from the server reaches bob afterwards.
        let general = engine.list_channels(&alice, &server.id).await.unwrap()[0].clone();
        engine
            .post_message(&alice, &general.id, "after the kick")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        while let Ok(frame) = rx.try_recv() {
            if let crate::engine::events::ServerFrame::Event(e) = frame {
                assert_ne!(e.entity_kind, EntityKind::Message, "kicked member got a message");
            }
        }
        assert!(engine.registry().subscriptions(session).is_empty());
    }
}
