use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event_bus::ShardReceiver;
use super::events::{DomainEvent, Operation, Resource, ServerFrame, SessionId};
use super::user_session::CloseReason;

/// Outcome of a non-blocking push to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The session closed; the frame is dropped silently.
    Gone,
    /// The session's queue is full.
    Full,
}

/// The dispatcher's view of the live sessions. Implemented by
/// `SessionRegistry`; tests substitute a recording fake.
pub trait SubscriberRegistry: Send + Sync + 'static {
    /// Sessions currently subscribed to a server.
    fn subscribers(&self, server_id: &str) -> Vec<SessionId>;

    fn deliver(&self, session_id: SessionId, frame: ServerFrame) -> Delivery;

    /// Add a server to every authenticated session of a user.
    fn subscribe_user(&self, user_id: &str, server_id: &str);

    /// Remove a server from every session of a user.
    fn unsubscribe_user(&self, user_id: &str, server_id: &str);

    /// Remove a deleted server from every session.
    fn drop_server(&self, server_id: &str);

    fn evict(&self, session_id: SessionId, reason: CloseReason);
}

/// Subscription change implied by an event, applied around its delivery.
enum SubscriptionChange<'a> {
    /// Subscribe before delivering, so the joining user sees their own join.
    Join { user_id: &'a str },
    /// Unsubscribe after delivering, so the leaving user sees their own removal.
    Leave { user_id: &'a str },
    ServerGone,
    None,
}

fn subscription_change(event: &DomainEvent) -> SubscriptionChange<'_> {
    match (&event.resource, event.operation) {
        (Resource::Membership(m), Operation::Created) => SubscriptionChange::Join {
            user_id: &m.user_id,
        },
        (Resource::Membership(m), Operation::Deleted) => SubscriptionChange::Leave {
            user_id: &m.user_id,
        },
        (Resource::Server(s), Operation::Created) => SubscriptionChange::Join {
            user_id: &s.owner_id,
        },
        (Resource::Server(_), Operation::Deleted) => SubscriptionChange::ServerGone,
        _ => SubscriptionChange::None,
    }
}

/// Deliver one event to every session subscribed to its server.
///
/// Never blocks: a session whose queue is full is evicted instead of slowing
/// the others down. Returns the number of sessions that received the event.
pub fn dispatch<R: SubscriberRegistry + ?Sized>(registry: &R, event: DomainEvent) -> usize {
    let change = subscription_change(&event);
    if let SubscriptionChange::Join { user_id } = change {
        registry.subscribe_user(user_id, &event.server_id);
    }

    let event = Arc::new(event);
    let mut delivered = 0;
    for session_id in registry.subscribers(&event.server_id) {
        match registry.deliver(session_id, ServerFrame::Event(event.clone())) {
            Delivery::Delivered => delivered += 1,
            Delivery::Gone => {}
            Delivery::Full => {
                warn!(
                    %session_id,
                    server_id = %event.server_id,
                    "outbound queue full, evicting slow session"
                );
                registry.evict(session_id, CloseReason::SlowConsumer);
            }
        }
    }

    match subscription_change(&event) {
        SubscriptionChange::Leave { user_id } => {
            registry.unsubscribe_user(user_id, &event.server_id)
        }
        SubscriptionChange::ServerGone => registry.drop_server(&event.server_id),
        _ => {}
    }

    debug!(
        server_id = %event.server_id,
        entity = ?event.entity_kind,
        operation = ?event.operation,
        delivered,
        "event dispatched"
    );
    delivered
}

/// Start one task per bus shard. Each task drains its shard in order until
/// the bus is dropped or `shutdown` fires.
pub fn spawn_shards<R: SubscriberRegistry>(
    registry: Arc<R>,
    receivers: Vec<ShardReceiver>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(shard, mut rx)| {
            let registry = registry.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        next = rx.recv() => match next {
                            Some(event) => {
                                dispatch(registry.as_ref(), event);
                            }
                            None => break,
                        },
                    }
                }
                info!(shard, "dispatcher shard stopped");
            })
        })
        .collect()
}
