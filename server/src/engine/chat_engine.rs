use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher;
use super::error::EngineError;
use super::event_bus::{DEFAULT_SHARD_BACKLOG, DEFAULT_SHARDS, EventBus};
use super::events::{DomainEvent, ServerFrame, SessionId};
use super::locks::{KeyedGuard, KeyedLocks};
use super::permissions::{Action, Roles, ServerAccess, can_perform};
use super::session_registry::{ClosedSession, SessionRegistry};
use super::user_session::{CloseReason, DEFAULT_OUTBOUND_QUEUE, SessionState};
use crate::auth::token::Authenticator;
use crate::db::models::{MemberRow, ServerRow};
use crate::db::queries::{members, servers, users};

/// Handshakes re-read memberships at most this many times before settling.
const MAX_SUBSCRIPTION_ATTEMPTS: usize = 5;

/// Realtime settings of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub session_queue_capacity: usize,
    pub bus_shards: usize,
    pub shard_backlog: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(45),
            session_queue_capacity: DEFAULT_OUTBOUND_QUEUE,
            bus_shards: DEFAULT_SHARDS,
            shard_backlog: DEFAULT_SHARD_BACKLOG,
        }
    }
}

/// What a mutation needs to know about a server before it writes.
#[derive(Debug, Clone)]
pub(crate) struct ServerContext {
    pub server: ServerRow,
    pub membership: Option<MemberRow>,
}

impl ServerContext {
    pub fn access(&self) -> ServerAccess<'_> {
        ServerAccess {
            owner_id: &self.server.owner_id,
            membership: self
                .membership
                .as_ref()
                .map(|m| Roles::from_column(&m.roles)),
        }
    }

    pub fn roles(&self) -> Roles {
        self.membership
            .as_ref()
            .map(|m| Roles::from_column(&m.roles))
            .unwrap_or_else(Roles::empty)
    }
}

/// The central hub: repository operations, the event bus and the live
/// sessions. Transport adapters (REST, WebSocket) call into this and hold
/// no state of their own.
///
/// Repository operations live in the sibling modules (`servers`, `channels`,
/// `messages`, `invites`, `members`, `users`) as further `impl ChatEngine`
/// blocks.
pub struct ChatEngine {
    pool: SqlitePool,
    bus: EventBus,
    registry: Arc<SessionRegistry>,
    /// Serializes membership, channel order, invite counters and event
    /// publication per server.
    server_locks: KeyedLocks,
    /// Serializes profile and presence changes per user.
    user_locks: KeyedLocks,
    authenticator: Arc<dyn Authenticator>,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl ChatEngine {
    /// Build the engine and start the dispatcher shards. Must be called
    /// inside a Tokio runtime.
    pub fn new(
        pool: SqlitePool,
        authenticator: Arc<dyn Authenticator>,
        config: EngineConfig,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session_queue_capacity));
        let (bus, receivers) = EventBus::new(config.bus_shards, config.shard_backlog);
        let shutdown = CancellationToken::new();
        dispatcher::spawn_shards(registry.clone(), receivers, shutdown.clone());
        info!(shards = bus.shard_count(), "chat engine started");

        Self {
            pool,
            bus,
            registry,
            server_locks: KeyedLocks::new(),
            user_locks: KeyedLocks::new(),
            authenticator,
            config,
            shutdown,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }

    /// Stop the dispatcher and close every session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let closed = self.registry.close_all();
        info!(sessions = closed.len(), "chat engine stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // ── Shared plumbing for repository operations ──────────────────

    pub(crate) async fn lock_server(&self, server_id: &str) -> KeyedGuard {
        self.server_locks.acquire(server_id).await
    }

    pub(crate) async fn lock_servers(&self, server_ids: &[String]) -> Vec<KeyedGuard> {
        self.server_locks.acquire_many(server_ids).await
    }

    pub(crate) async fn lock_user(&self, user_id: &str) -> KeyedGuard {
        self.user_locks.acquire(user_id).await
    }

    /// Server ids with a lock currently held or awaited.
    pub(crate) fn server_lock_count(&self) -> usize {
        self.server_locks.len()
    }

    /// Load a server and the principal's membership. Missing servers and
    /// servers the principal cannot see are both `NotFound`.
    pub(crate) async fn load_context(
        &self,
        server_id: &str,
        principal: &str,
    ) -> Result<ServerContext, EngineError> {
        let server = servers::get_server(&self.pool, server_id)
            .await?
            .ok_or(EngineError::NotFound("server"))?;
        let membership = members::get_member(&self.pool, server_id, principal).await?;
        let ctx = ServerContext { server, membership };
        if !ctx.access().is_visible_to(principal) {
            return Err(EngineError::NotFound("server"));
        }
        Ok(ctx)
    }

    pub(crate) fn authorize(
        ctx: &ServerContext,
        principal: &str,
        action: Action,
    ) -> Result<(), EngineError> {
        if can_perform(principal, &ctx.access(), action) {
            Ok(())
        } else {
            Err(EngineError::Forbidden(action.describe()))
        }
    }

    /// Hand a committed event to the bus. Callers still hold the lock of the
    /// event's server, so bus order equals commit order.
    pub(crate) async fn publish(&self, event: DomainEvent) {
        self.bus.publish(event).await;
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Register a new connection and queue its `ready` frame.
    pub fn open_session(&self) -> (SessionId, mpsc::Receiver<ServerFrame>) {
        let (id, rx) = self.registry.register(Instant::now());
        self.registry.send(
            id,
            ServerFrame::Ready {
                session_id: id,
                heartbeat_interval_ms: self.config.heartbeat_interval.as_millis() as u64,
            },
        );
        (id, rx)
    }

    /// Resolve a bearer token to a user who may act: unknown users and
    /// retired bots are `Unauthenticated`.
    pub async fn resolve_principal(&self, token: &str) -> Result<String, EngineError> {
        let user_id = self.authenticator.resolve(token)?;
        if !users::is_active(&self.pool, &user_id).await? {
            debug!(%user_id, "token names an unknown or retired user");
            return Err(EngineError::Unauthenticated);
        }
        Ok(user_id)
    }

    /// Authenticate a connected session and subscribe it to every server the
    /// user belongs to. The `authenticated` frame is queued ahead of any event.
    ///
    /// Returns the user id and the subscribed server ids.
    pub async fn authenticate_session(
        &self,
        session_id: SessionId,
        token: &str,
    ) -> Result<(String, Vec<String>), EngineError> {
        if self.registry.state(session_id) != SessionState::Connected {
            return Err(EngineError::Conflict(
                "session is already authenticated or closed".into(),
            ));
        }

        let user_id = self.resolve_principal(token).await?;
        if !self.registry.authenticate(session_id, &user_id) {
            return Err(EngineError::Conflict(
                "session is already authenticated or closed".into(),
            ));
        }

        let server_ids = self.sync_subscriptions(session_id, &user_id).await?;
        info!(%session_id, %user_id, servers = server_ids.len(), "session authenticated");

        if let Err(e) = self.refresh_presence(&user_id).await {
            warn!(%user_id, error = %e, "presence update after login failed");
        }
        Ok((user_id, server_ids))
    }

    /// Subscribe a freshly authenticated session to the user's servers.
    async fn sync_subscriptions(
        &self,
        session_id: SessionId,
        user_id: &str,
    ) -> Result<Vec<String>, EngineError> {
        let pool = self.pool.clone();
        let owner = user_id.to_string();
        self.sync_subscriptions_with(session_id, user_id, move || {
            let pool = pool.clone();
            let owner = owner.clone();
            Box::pin(async move { Ok(members::list_server_ids_for_user(&pool, &owner).await?) })
        })
        .await
    }

    /// Join and leave events processed while memberships are being read bump
    /// the user's epoch; a moved epoch means the snapshot may be stale, so it
    /// is read again. Every snapshot that differs from the last announced one
    /// is announced with a new `authenticated` frame.
    async fn sync_subscriptions_with<'a>(
        &self,
        session_id: SessionId,
        user_id: &str,
        mut load_server_ids: impl FnMut() -> BoxFuture<'a, Result<Vec<String>, EngineError>>,
    ) -> Result<Vec<String>, EngineError> {
        let mut announced: Option<Vec<String>> = None;
        for attempt in 1..=MAX_SUBSCRIPTION_ATTEMPTS {
            let epoch = self.registry.membership_epoch(user_id);
            let server_ids = load_server_ids().await?;

            let announce = (announced.as_ref() != Some(&server_ids)).then(|| {
                ServerFrame::Authenticated {
                    user_id: user_id.to_string(),
                    server_ids: server_ids.clone(),
                }
            });
            let subscribed: HashSet<String> = server_ids.iter().cloned().collect();
            if !self
                .registry
                .replace_subscriptions(session_id, subscribed, announce)
            {
                return Err(EngineError::Conflict("session closed during handshake".into()));
            }
            announced = Some(server_ids);

            if self.registry.membership_epoch(user_id) == epoch {
                break;
            }
            debug!(%session_id, attempt, "memberships changed during handshake, reloading");
            if attempt == MAX_SUBSCRIPTION_ATTEMPTS {
                warn!(%session_id, %user_id, "memberships kept changing during handshake");
            }
        }
        Ok(announced.unwrap_or_default())
    }

    /// Record a heartbeat and acknowledge it. Heartbeats are refused until
    /// the session has authenticated.
    pub fn heartbeat(&self, session_id: SessionId) -> Result<(), EngineError> {
        match self.registry.state(session_id) {
            SessionState::Connected => return Err(EngineError::Unauthenticated),
            SessionState::Closed => return Err(EngineError::NotFound("session")),
            SessionState::Authenticated => {}
        }
        if !self.registry.heartbeat(session_id, Instant::now()) {
            return Err(EngineError::NotFound("session"));
        }
        self.registry.send(session_id, ServerFrame::HeartbeatAck);
        Ok(())
    }

    /// Close a session (idempotent) and recompute its user's presence.
    ///
    /// `user_id` covers sessions that were already closed by the dispatcher
    /// or the reaper, whose presence still has to be refreshed.
    pub async fn end_session(
        &self,
        session_id: SessionId,
        user_id: Option<&str>,
        reason: CloseReason,
    ) {
        let closed = self.registry.close(session_id, reason);
        let user_id = closed
            .as_ref()
            .and_then(|c| c.user_id.as_deref())
            .or(user_id);
        if let Some(user_id) = user_id
            && let Err(e) = self.refresh_presence(user_id).await
        {
            warn!(%user_id, error = %e, "presence update after disconnect failed");
        }
    }

    /// Close sessions that stopped heartbeating and update presence of
    /// their users.
    pub async fn reap_idle_sessions(&self) -> Vec<ClosedSession> {
        let closed = self
            .registry
            .reap_idle(Instant::now(), self.config.heartbeat_timeout);
        let affected: HashSet<&str> = closed.iter().filter_map(|c| c.user_id.as_deref()).collect();
        for user_id in affected {
            if let Err(e) = self.refresh_presence(user_id).await {
                warn!(%user_id, error = %e, "presence update after reaping failed");
            }
        }
        if !closed.is_empty() {
            info!(count = closed.len(), "reaped idle sessions");
        }
        closed
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::auth::config::AuthConfig;
    use crate::auth::token::JwtAuthenticator;
    use crate::db::pool::{create_pool, run_migrations};
    use std::time::Duration;

    pub const SECRET: &str = "engine-test-secret";

    pub fn auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: SECRET.into(),
            session_expiry_hours: 1,
        }
    }

    pub fn token_for(user_id: &str) -> String {
        JwtAuthenticator::new(auth_config()).issue(user_id).unwrap()
    }

    pub async fn engine_with(config: EngineConfig) -> ChatEngine {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        ChatEngine::new(pool, Arc::new(JwtAuthenticator::new(auth_config())), config)
    }

    pub async fn engine() -> ChatEngine {
        engine_with(EngineConfig::default()).await
    }

    pub async fn user(engine: &ChatEngine, name: &str) -> String {
        engine.create_user(name).await.unwrap().id
    }

    /// A server owned by `owner` with `members` joined through an invite.
    pub async fn server_with(engine: &ChatEngine, owner: &str, members: &[&str]) -> ServerRow {
        let server = engine.create_server(owner, "Test", None).await.unwrap();
        if !members.is_empty() {
            let invite = engine
                .create_invite(owner, &server.id, None, None)
                .await
                .unwrap();
            for member in members {
                engine.redeem_invite(member, &invite.code).await.unwrap();
            }
        }
        server
    }

    /// Next domain event on a session queue, skipping control frames.
    pub async fn next_event(rx: &mut mpsc::Receiver<ServerFrame>) -> Arc<DomainEvent> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for an event")
                .expect("session queue closed");
            if let ServerFrame::Event(event) = frame {
                return event;
            }
        }
    }

    /// Next domain event matching `pred`, skipping everything else.
    pub async fn next_event_where(
        rx: &mut mpsc::Receiver<ServerFrame>,
        pred: impl Fn(&DomainEvent) -> bool,
    ) -> Arc<DomainEvent> {
        loop {
            let event = next_event(rx).await;
            if pred(&event) {
                return event;
            }
        }
    }
}
