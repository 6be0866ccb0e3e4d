use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cache_invalidation::{InvalidationMessage, InvalidationPublisher, InvalidationSubscriber};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics;

const CLIENT_QUEUE_CAPACITY: usize = 10;
const SEND_TIMEOUT: Duration = Duration::from_secs(1);
/// Consecutive full-queue/timeout sends a client can rack up before it's
/// evicted from the registry. A single slow tick just drops that one frame;
/// only sustained unresponsiveness gets the client dropped outright.
const EVICT_AFTER_CONSECUTIVE_FAILURES: u32 = 3;

/// A single SSE connection's mailbox. `user_id` is the filter the manager
/// matches broadcasts against; `sender` feeds the connection's stream.
struct ClientRecord {
    user_id: Uuid,
    sender: mpsc::Sender<Value>,
    consecutive_failures: AtomicU32,
}

/// Fan-out hub for order update pushes. One instance subscribes to the Redis
/// channel once at startup; every SSE connection registers a bounded queue
/// here and is matched by `user_id` on each incoming broadcast.
///
/// A client whose queue stays full/unresponsive across
/// [`EVICT_AFTER_CONSECUTIVE_FAILURES`] consecutive 1s send attempts is
/// dropped from the registry outright, so a single slow reader can't pin
/// memory forever; an isolated slow tick just drops that one frame.
pub struct PushManager {
    clients: Arc<RwLock<HashMap<Uuid, ClientRecord>>>,
    publisher: InvalidationPublisher,
    service_name: String,
}

impl PushManager {
    pub async fn new(redis_url: &str, channel: String, service_name: String) -> anyhow::Result<Self> {
        let publisher =
            InvalidationPublisher::with_channel(redis_url, service_name.clone(), channel).await?;
        Ok(Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            publisher,
            service_name,
        })
    }

    /// Subscribe to the broadcast channel and start fanning messages out to
    /// registered clients. Must be called once, at service startup.
    pub async fn start(&self, redis_url: &str, channel: String) -> anyhow::Result<JoinHandle<()>> {
        let subscriber = InvalidationSubscriber::with_channel(redis_url, channel).await?;
        let clients = Arc::clone(&self.clients);

        let handle = subscriber
            .subscribe(move |msg: InvalidationMessage| {
                let clients = Arc::clone(&clients);
                async move { dispatch(clients, msg).await }
            })
            .await?;

        Ok(handle)
    }

    /// Publish an order update for `user_id` onto the broadcast channel. Any
    /// instance's [`PushManager`] subscribed to the same channel fans it out
    /// to its own locally registered clients.
    pub async fn publish(&self, user_id: Uuid, event: &str, payload: Value) -> anyhow::Result<()> {
        let msg = InvalidationMessage::user_event(
            user_id.to_string(),
            event,
            payload,
            self.service_name.clone(),
        );
        self.publisher.publish(msg).await?;
        Ok(())
    }

    /// Register a new client connection, returning the receiver side of its
    /// bounded mailbox and a guard id used to unregister on disconnect.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::Receiver<Value>) {
        let client_id = Uuid::now_v7();
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        self.clients.write().await.insert(
            client_id,
            ClientRecord {
                user_id,
                sender: tx,
                consecutive_failures: AtomicU32::new(0),
            },
        );
        metrics::PUSH_REGISTERED_CLIENTS.inc();
        (client_id, rx)
    }

    pub async fn unregister(&self, client_id: Uuid) {
        if self.clients.write().await.remove(&client_id).is_some() {
            metrics::PUSH_REGISTERED_CLIENTS.dec();
        }
    }
}

async fn dispatch(
    clients: Arc<RwLock<HashMap<Uuid, ClientRecord>>>,
    msg: InvalidationMessage,
) -> Result<(), cache_invalidation::InvalidationError> {
    let Some(user_id_str) = msg.entity_id.as_deref() else {
        return Ok(());
    };
    let Ok(user_id) = Uuid::parse_str(user_id_str) else {
        return Ok(());
    };
    let Some(metadata) = msg.metadata.as_ref() else {
        return Ok(());
    };
    let Some(event) = metadata.get("event").and_then(|v| v.as_str()) else {
        return Ok(());
    };
    let payload = metadata.get("payload").cloned().unwrap_or(Value::Null);

    let frame = serde_json::json!({ "event": event, "payload": payload });

    let mut stale = Vec::new();
    {
        let guard = clients.read().await;
        for (client_id, record) in guard.iter() {
            if record.user_id != user_id {
                continue;
            }
            match tokio::time::timeout(SEND_TIMEOUT, record.sender.send(frame.clone())).await {
                Ok(Ok(())) => {
                    record.consecutive_failures.store(0, Ordering::Relaxed);
                }
                Ok(Err(_)) | Err(_) => {
                    metrics::PUSH_DROPPED_TOTAL.inc();
                    let failures = record.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if failures >= EVICT_AFTER_CONSECUTIVE_FAILURES {
                        debug!(%client_id, %user_id, failures, "push queue unresponsive, dropping client");
                        stale.push(*client_id);
                    } else {
                        debug!(%client_id, %user_id, failures, "push queue full or closed, dropping frame");
                    }
                }
            }
        }
    }

    if !stale.is_empty() {
        let mut guard = clients.write().await;
        for client_id in stale {
            if guard.remove(&client_id).is_some() {
                metrics::PUSH_REGISTERED_CLIENTS.dec();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache_invalidation::InvalidationMessage;

    #[tokio::test]
    async fn register_and_unregister_tracks_client_count() {
        // Smoke test for bookkeeping only; dispatch requires a live Redis
        // connection so it's covered by the crate's integration tests.
        let clients: Arc<RwLock<HashMap<Uuid, ClientRecord>>> = Arc::new(RwLock::new(HashMap::new()));
        let (tx, _rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let user_id = Uuid::now_v7();
        let client_id = Uuid::now_v7();
        clients.write().await.insert(
            client_id,
            ClientRecord {
                user_id,
                sender: tx,
                consecutive_failures: AtomicU32::new(0),
            },
        );

        assert_eq!(clients.read().await.len(), 1);
        clients.write().await.remove(&client_id);
        assert_eq!(clients.read().await.len(), 0);
    }

    #[tokio::test]
    async fn a_single_dropped_frame_does_not_evict_the_client() {
        let clients: Arc<RwLock<HashMap<Uuid, ClientRecord>>> = Arc::new(RwLock::new(HashMap::new()));
        let user_id = Uuid::now_v7();
        let client_id = Uuid::now_v7();
        let (tx, rx) = mpsc::channel(1);
        clients.write().await.insert(
            client_id,
            ClientRecord {
                user_id,
                sender: tx,
                consecutive_failures: AtomicU32::new(0),
            },
        );
        // Fill the queue so the next send times out, without ever reading.
        std::mem::forget(rx);
        tx_fill(&clients, client_id).await;

        let msg = InvalidationMessage::user_event(user_id.to_string(), "order-update", Value::Null, "test".into());
        dispatch(Arc::clone(&clients), msg).await.unwrap();

        assert_eq!(clients.read().await.len(), 1, "client should survive a single dropped frame");
        let guard = clients.read().await;
        let record = guard.get(&client_id).unwrap();
        assert_eq!(record.consecutive_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn client_is_evicted_after_sustained_consecutive_failures() {
        let clients: Arc<RwLock<HashMap<Uuid, ClientRecord>>> = Arc::new(RwLock::new(HashMap::new()));
        let user_id = Uuid::now_v7();
        let client_id = Uuid::now_v7();
        let (tx, rx) = mpsc::channel(1);
        clients.write().await.insert(
            client_id,
            ClientRecord {
                user_id,
                sender: tx,
                consecutive_failures: AtomicU32::new(0),
            },
        );
        std::mem::forget(rx);
        tx_fill(&clients, client_id).await;

        for _ in 0..EVICT_AFTER_CONSECUTIVE_FAILURES {
            let msg =
                InvalidationMessage::user_event(user_id.to_string(), "order-update", Value::Null, "test".into());
            dispatch(Arc::clone(&clients), msg).await.unwrap();
        }

        assert!(
            clients.read().await.get(&client_id).is_none(),
            "client should be evicted once consecutive failures reach the threshold"
        );
    }

    async fn tx_fill(clients: &Arc<RwLock<HashMap<Uuid, ClientRecord>>>, client_id: Uuid) {
        let guard = clients.read().await;
        let record = guard.get(&client_id).unwrap();
        record.sender.send(Value::Null).await.unwrap();
    }
}
