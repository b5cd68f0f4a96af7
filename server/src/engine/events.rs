use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{ChannelRow, InviteRow, MemberRow, MessageRow, ServerRow, UserRow};

/// Unique identifier for a connected session (one per connection, not per user).
pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Server,
    Channel,
    Message,
    Invite,
    Membership,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Created,
    Updated,
    Deleted,
}

/// Post-mutation snapshot carried by an event. For deletions this is the
/// last state of the removed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Resource {
    Server(ServerRow),
    Channel(ChannelRow),
    Message(MessageRow),
    Invite(InviteRow),
    Membership(MemberRow),
    User(UserRow),
}

impl Resource {
    pub fn kind(&self) -> EntityKind {
        match self {
            Resource::Server(_) => EntityKind::Server,
            Resource::Channel(_) => EntityKind::Channel,
            Resource::Message(_) => EntityKind::Message,
            Resource::Invite(_) => EntityKind::Invite,
            Resource::Membership(_) => EntityKind::Membership,
            Resource::User(_) => EntityKind::User,
        }
    }
}

/// Immutable record of one committed mutation, scoped to one server.
/// Serializes as the wire envelope `{ entityKind, operation, serverId, resource }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub entity_kind: EntityKind,
    pub operation: Operation,
    pub server_id: String,
    pub resource: Resource,
}

impl DomainEvent {
    pub fn new(operation: Operation, server_id: impl Into<String>, resource: Resource) -> Self {
        Self {
            entity_kind: resource.kind(),
            operation,
            server_id: server_id.into(),
            resource,
        }
    }

    pub fn server(operation: Operation, server: ServerRow) -> Self {
        Self::new(operation, server.id.clone(), Resource::Server(server))
    }

    pub fn channel(operation: Operation, channel: ChannelRow) -> Self {
        Self::new(operation, channel.server_id.clone(), Resource::Channel(channel))
    }

    pub fn message(operation: Operation, message: MessageRow) -> Self {
        Self::new(operation, message.server_id.clone(), Resource::Message(message))
    }

    pub fn invite(operation: Operation, invite: InviteRow) -> Self {
        Self::new(operation, invite.server_id.clone(), Resource::Invite(invite))
    }

    pub fn membership(operation: Operation, member: MemberRow) -> Self {
        Self::new(operation, member.server_id.clone(), Resource::Membership(member))
    }

    /// A user change, as seen by one of the servers the user belongs to.
    pub fn user(server_id: impl Into<String>, user: UserRow) -> Self {
        Self::new(Operation::Updated, server_id, Resource::User(user))
    }
}

/// Frames sent from a client over its session connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Authenticate { token: String },
    Heartbeat,
}

/// Frames pushed to a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on a new connection.
    Ready {
        session_id: SessionId,
        heartbeat_interval_ms: u64,
    },

    /// Handshake complete; the session now receives events for these servers.
    Authenticated {
        user_id: String,
        server_ids: Vec<String>,
    },

    HeartbeatAck,

    /// A domain event for a subscribed server, envelope fields inlined.
    Event(Arc<DomainEvent>),

    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
}

impl ServerFrame {
    pub fn error(err: &super::error::EngineError) -> Self {
        let message = if err.is_internal() {
            "internal error".to_string()
        } else {
            err.to_string()
        };
        ServerFrame::Error {
            code: err.code().to_string(),
            message,
            field: err.field().map(str::to_string),
        }
    }
}
