use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::mpsc;
use tracing::error;

use super::events::DomainEvent;

/// Default number of dispatch shards.
pub const DEFAULT_SHARDS: usize = 4;

/// Default per-shard backlog before producers are made to wait.
pub const DEFAULT_SHARD_BACKLOG: usize = 1024;

/// Receiving half of one shard, consumed by exactly one dispatcher task.
pub type ShardReceiver = mpsc::Receiver<DomainEvent>;

/// In-process fan-out point between the repository and the dispatcher.
///
/// Each server hashes to one shard, and each shard is a bounded FIFO drained
/// by a single task, so events of one server leave the bus in the order they
/// were published. Publishing waits for room instead of dropping.
pub struct EventBus {
    shards: Vec<mpsc::Sender<DomainEvent>>,
}

impl EventBus {
    pub fn new(shard_count: usize, backlog: usize) -> (Self, Vec<ShardReceiver>) {
        let shard_count = shard_count.max(1);
        let backlog = backlog.max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..shard_count).map(|_| mpsc::channel(backlog)).unzip();
        (Self { shards: senders }, receivers)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_for(&self, server_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        server_id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Queue an event for dispatch, waiting while the shard is full.
    ///
    /// Callers publish while holding the server's lock, which makes bus
    /// order equal commit order for that server.
    pub async fn publish(&self, event: DomainEvent) {
        let shard = self.shard_for(&event.server_id);
        if let Err(e) = self.shards[shard].send(event).await {
            // Only happens once the dispatcher has shut down.
            error!(
                shard,
                server_id = %e.0.server_id,
                "event bus closed, dropping committed event"
            );
        }
    }
}
