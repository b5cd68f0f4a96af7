use std::collections::HashSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};
use uuid::Uuid;

use super::dispatcher::{Delivery, SubscriberRegistry};
use super::events::{ServerFrame, SessionId};
use super::user_session::{CloseReason, SessionState, UserSession};

/// What remains of a session after it is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSession {
    pub id: SessionId,
    pub user_id: Option<String>,
    pub reason: CloseReason,
}

/// Live connections, indexed by server (for fan-out) and by user (for
/// membership refresh and presence).
///
/// Lock discipline: a `sessions` entry may be held while touching `by_server`
/// or `by_user`, never the other way round. Index insertions happen under the
/// session's entry so a concurrent `close` always sees them; removals happen
/// after the session left `sessions`. Readers of the indexes copy ids out and
/// tolerate ids that have since gone away.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, UserSession>,
    by_server: DashMap<String, HashSet<SessionId>>,
    by_user: DashMap<String, HashSet<SessionId>>,
    /// Bumped after every membership-driven subscription change for a user.
    membership_epochs: DashMap<String, u64>,
    queue_capacity: usize,
}

impl SessionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            by_server: DashMap::new(),
            by_user: DashMap::new(),
            membership_epochs: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new unauthenticated connection.
    pub fn register(&self, now: Instant) -> (SessionId, mpsc::Receiver<ServerFrame>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.sessions.insert(id, UserSession::new(id, tx, now));
        debug!(session_id = %id, "session registered");
        (id, rx)
    }

    /// Learn why a session closes, whoever closes it. Returns `None` if the
    /// session is already gone; a later call replaces the earlier receiver.
    pub fn on_close(&self, session_id: SessionId) -> Option<oneshot::Receiver<CloseReason>> {
        let mut session = self.sessions.get_mut(&session_id)?;
        let (tx, rx) = oneshot::channel();
        session.close_notify = Some(tx);
        Some(rx)
    }

    /// Move a session from `Connected` to `Authenticated`. Returns false if
    /// the session is gone or already authenticated.
    pub fn authenticate(&self, session_id: SessionId, user_id: &str) -> bool {
        let Some(mut session) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        if session.state != SessionState::Connected {
            return false;
        }
        session.state = SessionState::Authenticated;
        session.user_id = Some(user_id.to_string());
        self.by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(session_id);
        true
    }

    /// Current membership epoch for a user. A handshake that reads the same
    /// epoch before and after loading memberships saw a stable set.
    pub fn membership_epoch(&self, user_id: &str) -> u64 {
        self.membership_epochs.get(user_id).map(|e| *e).unwrap_or(0)
    }

    fn bump_epoch(&self, user_id: &str) {
        *self
            .membership_epochs
            .entry(user_id.to_string())
            .or_insert(0) += 1;
    }

    /// Replace a session's subscription set. Returns false if the session
    /// is gone or not authenticated.
    ///
    /// `announce` is queued before the new subscriptions become visible to
    /// the dispatcher, so no event for them can overtake it.
    pub fn replace_subscriptions(
        &self,
        session_id: SessionId,
        servers: HashSet<String>,
        announce: Option<ServerFrame>,
    ) -> bool {
        let Some(mut session) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        if !session.is_authenticated() {
            return false;
        }
        if let Some(frame) = announce
            && let Err(e) = session.outbound.try_send(frame)
        {
            debug!(session_id = %session_id, error = %e, "could not queue subscription announcement");
        }

        let removed: Vec<String> = session.servers.difference(&servers).cloned().collect();
        for server_id in &removed {
            self.remove_from_server_index(server_id, session_id);
        }
        for server_id in servers.difference(&session.servers) {
            self.by_server
                .entry(server_id.clone())
                .or_default()
                .insert(session_id);
        }
        session.servers = servers;
        true
    }

    fn remove_from_server_index(&self, server_id: &str, session_id: SessionId) {
        if let Some(mut set) = self.by_server.get_mut(server_id) {
            set.remove(&session_id);
        }
        self.by_server.remove_if(server_id, |_, set| set.is_empty());
    }

    fn remove_from_user_index(&self, user_id: &str, session_id: SessionId) {
        if let Some(mut set) = self.by_user.get_mut(user_id) {
            set.remove(&session_id);
        }
        self.by_user.remove_if(user_id, |_, set| set.is_empty());
    }

    fn sessions_of_user(&self, user_id: &str) -> Vec<SessionId> {
        self.by_user
            .get(user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Record liveness. Only authenticated sessions can extend their
    /// lease; a connection that never completes the handshake is reaped
    /// `heartbeat_timeout` after it registered.
    pub fn heartbeat(&self, session_id: SessionId, now: Instant) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(mut session) if session.state == SessionState::Authenticated => {
                session.last_heartbeat = now;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, session_id: SessionId) -> SessionState {
        self.sessions
            .get(&session_id)
            .map(|s| s.state)
            .unwrap_or(SessionState::Closed)
    }

    /// Servers a session currently receives events for.
    pub fn subscriptions(&self, session_id: SessionId) -> HashSet<String> {
        self.sessions
            .get(&session_id)
            .map(|s| s.servers.clone())
            .unwrap_or_default()
    }

    /// Number of authenticated sessions a user has open.
    pub fn live_sessions(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map(|set| set.len()).unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Push a frame to one session without waiting.
    pub fn send(&self, session_id: SessionId, frame: ServerFrame) -> Delivery {
        let Some(session) = self.sessions.get(&session_id) else {
            return Delivery::Gone;
        };
        match session.outbound.try_send(frame) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    /// Close a session. Idempotent: only the first call returns the closed session.
    ///
    /// The session leaves every index before its outbound sender is dropped,
    /// which is what ends the connection's write loop.
    pub fn close(&self, session_id: SessionId, reason: CloseReason) -> Option<ClosedSession> {
        let (_, mut session) = self.sessions.remove(&session_id)?;
        if let Some(notify) = session.close_notify.take() {
            let _ = notify.send(reason);
        }
        for server_id in &session.servers {
            self.remove_from_server_index(server_id, session_id);
        }
        if let Some(user_id) = &session.user_id {
            self.remove_from_user_index(user_id, session_id);
        }
        info!(
            session_id = %session_id,
            user_id = session.user_id.as_deref().unwrap_or("-"),
            reason = reason.as_str(),
            "session closed"
        );
        let closed = ClosedSession {
            id: session_id,
            user_id: session.user_id.clone(),
            reason,
        };
        drop(session);
        Some(closed)
    }

    /// Close every session whose last heartbeat is older than `timeout`.
    pub fn reap_idle(&self, now: Instant, timeout: Duration) -> Vec<ClosedSession> {
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| now.saturating_duration_since(s.last_heartbeat) > timeout)
            .map(|s| s.id)
            .collect();

        stale
            .into_iter()
            .filter_map(|id| {
                // Best effort: the queue may be full or already gone.
                let _ = self.send(
                    id,
                    ServerFrame::Error {
                        code: "heartbeat_timeout".into(),
                        message: "no heartbeat received in time".into(),
                        field: None,
                    },
                );
                self.close(id, CloseReason::HeartbeatTimeout)
            })
            .collect()
    }

    /// Close every session a user holds, e.g. when their credentials are revoked.
    pub fn close_user(&self, user_id: &str, reason: CloseReason) -> Vec<ClosedSession> {
        self.sessions_of_user(user_id)
            .into_iter()
            .filter_map(|id| self.close(id, reason))
            .collect()
    }

    /// Close everything, used at shutdown.
    pub fn close_all(&self) -> Vec<ClosedSession> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|s| s.id).collect();
        ids.into_iter()
            .filter_map(|id| self.close(id, CloseReason::Shutdown))
            .collect()
    }
}

impl SubscriberRegistry for SessionRegistry {
    fn subscribers(&self, server_id: &str) -> Vec<SessionId> {
        self.by_server
            .get(server_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn deliver(&self, session_id: SessionId, frame: ServerFrame) -> Delivery {
        self.send(session_id, frame)
    }

    fn subscribe_user(&self, user_id: &str, server_id: &str) {
        for session_id in self.sessions_of_user(user_id) {
            let Some(mut session) = self.sessions.get_mut(&session_id) else {
                continue;
            };
            if session.is_authenticated() && session.servers.insert(server_id.to_string()) {
                self.by_server
                    .entry(server_id.to_string())
                    .or_default()
                    .insert(session_id);
            }
        }
        self.bump_epoch(user_id);
    }

    fn unsubscribe_user(&self, user_id: &str, server_id: &str) {
        for session_id in self.sessions_of_user(user_id) {
            let Some(mut session) = self.sessions.get_mut(&session_id) else {
                continue;
            };
            if session.servers.remove(server_id) {
                self.remove_from_server_index(server_id, session_id);
            }
        }
        self.bump_epoch(user_id);
    }

    fn drop_server(&self, server_id: &str) {
        let Some((_, subscribed)) = self.by_server.remove(server_id) else {
            return;
        };
        let mut users = HashSet::new();
        for session_id in subscribed {
            if let Some(mut session) = self.sessions.get_mut(&session_id) {
                session.servers.remove(server_id);
                if let Some(user_id) = &session.user_id {
                    users.insert(user_id.clone());
                }
            }
        }
        for user_id in users {
            self.bump_epoch(&user_id);
        }
    }

    fn evict(&self, session_id: SessionId, reason: CloseReason) {
        self.close(session_id, reason);
    }
}
