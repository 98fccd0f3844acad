use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use chitchat_types::UserId;
use chitchat_types::events::GatewayEvent;

/// What to do when a connection's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the new payload; the connection stays up.
    #[default]
    Drop,
    /// Wait for room. The pushing request is held until the socket drains.
    Block,
    /// Evict the connection from the registry, which ends its write loop.
    Disconnect,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown overflow policy '{0}' (expected drop, block or disconnect)")]
pub struct ParseOverflowPolicyError(String);

impl FromStr for OverflowPolicy {
    type Err = ParseOverflowPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "block" => Ok(Self::Block),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(ParseOverflowPolicyError(other.to_string())),
        }
    }
}

/// Per-connection outbound queue settings.
#[derive(Debug, Clone, Copy)]
pub struct OutboundConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            overflow: OverflowPolicy::Drop,
        }
    }
}

/// Result of a best-effort push to a user's live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Payload is on the outbound queue.
    Queued,
    /// No live connection for that user.
    Offline,
    /// Queue was full and the payload was discarded.
    Dropped,
    /// Queue was full and the connection was evicted.
    Evicted,
    /// The connection's write loop is already gone.
    Closed,
}

/// Handle to one live connection's outbound queue.
#[derive(Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }
}

/// Returned by `register`: the pump keeps the receiver and the id it must
/// present when unregistering.
pub struct Registration {
    pub conn_id: Uuid,
    pub outbound: mpsc::Receiver<String>,
}

/// Maps each user to their single live connection (last registered wins).
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: OutboundConfig,

    /// user_id -> current connection
    connections: RwLock<HashMap<UserId, ConnectionHandle>>,
}

impl Registry {
    pub fn new(config: OutboundConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> OutboundConfig {
        self.inner.config
    }

    /// Register a new connection for `user_id`, replacing any existing one.
    ///
    /// The replaced handle is dropped here, so the previous connection's
    /// write loop sees its queue close and shuts that socket down.
    pub async fn register(&self, user_id: UserId) -> Registration {
        let conn_id = Uuid::new_v4();
        let (tx, outbound) = mpsc::channel(self.inner.config.capacity.max(1));
        let previous = self
            .inner
            .connections
            .write()
            .await
            .insert(user_id, ConnectionHandle { conn_id, tx });

        if let Some(previous) = previous {
            debug!(
                "User {} reconnected; evicting connection {}",
                user_id, previous.conn_id
            );
        }

        Registration { conn_id, outbound }
    }

    /// Remove the entry for `user_id`, but only if `conn_id` still owns it.
    pub async fn unregister(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut connections = self.inner.connections.write().await;
        match connections.get(&user_id) {
            Some(handle) if handle.conn_id == conn_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.inner.connections.read().await.get(&user_id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    /// Best-effort push of an already-serialized payload. Never retries.
    pub async fn push(&self, user_id: UserId, payload: String) -> PushOutcome {
        // Clone out of the map so a blocked send never holds the registry lock.
        let Some(handle) = self.lookup(user_id).await else {
            return PushOutcome::Offline;
        };

        match self.inner.config.overflow {
            OverflowPolicy::Block => match handle.tx.send(payload).await {
                Ok(()) => PushOutcome::Queued,
                Err(_) => PushOutcome::Closed,
            },
            policy => match handle.tx.try_send(payload) {
                Ok(()) => PushOutcome::Queued,
                Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
                Err(mpsc::error::TrySendError::Full(_)) if policy == OverflowPolicy::Disconnect => {
                    warn!(
                        "Outbound queue full for user {}; evicting connection {}",
                        user_id, handle.conn_id
                    );
                    self.unregister(user_id, handle.conn_id).await;
                    PushOutcome::Evicted
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Outbound queue full for user {}; dropping payload", user_id);
                    PushOutcome::Dropped
                }
            },
        }
    }

    /// Serialize `event` and push it to `user_id`'s live connection, if any.
    pub async fn send_event(&self, user_id: UserId, event: &GatewayEvent) -> PushOutcome {
        match event.to_json() {
            Ok(json) => self.push(user_id, json).await,
            Err(e) => {
                warn!("Failed to serialize gateway event for user {}: {}", user_id, e);
                PushOutcome::Dropped
            }
        }
    }
}
