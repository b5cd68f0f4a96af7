use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use super::events::{ServerFrame, SessionId};

/// Default queued outbound frames per session (slow clients get evicted, not waited on).
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Connection lifecycle. `Closed` sessions are removed from the registry,
/// so only the first two are ever observed on a stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open, no principal yet.
    Connected,
    /// Principal resolved; subscriptions follow its memberships.
    Authenticated,
    Closed,
}

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer went away or sent a close frame.
    TransportClosed,
    AuthenticationFailed,
    ProtocolError,
    HeartbeatTimeout,
    /// The outbound queue filled up.
    SlowConsumer,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::TransportClosed => "transport_closed",
            CloseReason::AuthenticationFailed => "authentication_failed",
            CloseReason::ProtocolError => "protocol_error",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::SlowConsumer => "slow_consumer",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// One live connection's runtime state.
#[derive(Debug)]
pub struct UserSession {
    pub id: SessionId,
    /// Set once the session authenticates.
    pub user_id: Option<String>,
    pub state: SessionState,
    /// Servers whose events this session receives.
    pub servers: HashSet<String>,
    /// Send outbound frames to this session's write loop (bounded).
    pub outbound: mpsc::Sender<ServerFrame>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: Instant,
    /// Told why the session closed, for the connection that owns it.
    pub close_notify: Option<oneshot::Sender<CloseReason>>,
}

impl UserSession {
    pub fn new(id: SessionId, outbound: mpsc::Sender<ServerFrame>, now: Instant) -> Self {
        Self {
            id,
            user_id: None,
            state: SessionState::Connected,
            servers: HashSet::new(),
            outbound,
            connected_at: Utc::now(),
            last_heartbeat: now,
            close_notify: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_new_session_is_connected_and_unsubscribed() {
        let (tx, _rx) = mpsc::channel(4);
        let session = UserSession::new(Uuid::new_v4(), tx, Instant::now());
        assert_eq!(session.state, SessionState::Connected);
        assert!(!session.is_authenticated());
        assert!(session.user_id.is_none());
        assert!(session.servers.is_empty());
    }

    #[test]
    fn test_close_reason_names() {
        assert_eq!(CloseReason::SlowConsumer.as_str(), "slow_consumer");
        assert_eq!(CloseReason::HeartbeatTimeout.as_str(), "heartbeat_timeout");
    }
}
