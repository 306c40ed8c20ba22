use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::ActorRole;

use crate::error::RelayError;
use crate::models::RealtimeEnvelope;
use crate::services::event_bus::{encode, EventBus, RealtimePublisher};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RelayTarget {
    Actor(Uuid),
    Role(ActorRole),
    All,
}

/// Frame exchanged between API nodes over the Redis channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayFrame {
    pub origin: Uuid,
    pub target: RelayTarget,
    pub message: String,
}

/// Hand a frame received from another node to local connections.
/// Frames this node published itself were already delivered locally.
pub fn apply_frame(bus: &EventBus, node_id: Uuid, frame: RelayFrame) -> usize {
    if frame.origin == node_id {
        return 0;
    }

    let message: Arc<str> = Arc::from(frame.message);
    match frame.target {
        RelayTarget::Actor(actor_id) => usize::from(bus.publish_local(actor_id, &message)),
        RelayTarget::Role(role) => bus.publish_role_local(role, &message),
        RelayTarget::All => bus.broadcast_local(&message),
    }
}

/// Cross-node fan-out: deliver locally, then PUBLISH so every other node
/// can deliver to the connections it holds.
pub struct RedisRelay {
    bus: EventBus,
    pool: Pool,
    client: redis::Client,
    channel: String,
    node_id: Uuid,
}

impl RedisRelay {
    pub async fn connect(config: &AppConfig, bus: EventBus) -> Result<Self, RelayError> {
        let redis_url = config
            .redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());
        let relay = Self::build(redis_url, config.realtime_channel.clone(), bus)?;

        let mut conn = relay.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Realtime relay connected on channel {} as node {}", relay.channel, relay.node_id);
        Ok(relay)
    }

    /// Pool and client are lazy; nothing is dialled until first use.
    fn build(redis_url: String, channel: String, bus: EventBus) -> Result<Self, RelayError> {
        let pool = Config::from_url(redis_url.clone())
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| RelayError::Pool(e.to_string()))?;
        let client = redis::Client::open(redis_url)?;

        Ok(Self {
            bus,
            pool,
            client,
            channel,
            node_id: Uuid::new_v4(),
        })
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Listen on the channel until the task is aborted, reconnecting with
    /// exponential backoff when the subscription drops.
    pub fn spawn_subscriber(self: &Arc<Self>) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = Duration::from_millis(500);
            loop {
                match relay.listen().await {
                    Ok(()) => {
                        warn!("Realtime relay subscription ended, reconnecting");
                        backoff = Duration::from_millis(500);
                    }
                    Err(e) => {
                        error!("Realtime relay subscription failed: {}", e);
                    }
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        })
    }

    async fn listen(&self) -> Result<(), RelayError> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(&self.channel).await?;
        debug!("Subscribed to realtime channel {}", self.channel);

        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Dropping unreadable relay payload: {}", e);
                    continue;
                }
            };

            match serde_json::from_str::<RelayFrame>(&payload) {
                Ok(frame) => {
                    apply_frame(&self.bus, self.node_id, frame);
                }
                Err(e) => warn!("Dropping malformed relay frame: {}", e),
            }
        }
        Ok(())
    }

    async fn connection(&self) -> Result<Connection, RelayError> {
        self.pool.get().await.map_err(|e| RelayError::Pool(e.to_string()))
    }

    /// Local delivery has already happened; the PUBLISH runs in its own task
    /// so a slow Redis never holds up the caller.
    fn forward(&self, target: RelayTarget, message: &str) {
        let frame = RelayFrame {
            origin: self.node_id,
            target,
            message: message.to_string(),
        };
        let pool = self.pool.clone();
        let channel = self.channel.clone();

        tokio::spawn(async move {
            if let Err(e) = publish_frame(&pool, &channel, &frame).await {
                warn!("Failed to relay realtime frame: {}", e);
            }
        });
    }
}

async fn publish_frame(pool: &Pool, channel: &str, frame: &RelayFrame) -> Result<(), RelayError> {
    let payload = serde_json::to_string(frame)?;
    let mut conn = pool.get().await.map_err(|e| RelayError::Pool(e.to_string()))?;
    let _: i64 = redis::cmd("PUBLISH")
        .arg(channel)
        .arg(payload)
        .query_async(&mut conn)
        .await?;
    Ok(())
}

#[async_trait]
impl RealtimePublisher for RedisRelay {
    async fn publish(&self, actor_id: Uuid, envelope: &RealtimeEnvelope) -> bool {
        let Some(frame) = encode(envelope) else {
            return false;
        };
        let delivered = self.bus.publish_local(actor_id, &frame);
        self.forward(RelayTarget::Actor(actor_id), &frame);
        delivered
    }

    async fn publish_to_role(&self, role: ActorRole, envelope: &RealtimeEnvelope) -> usize {
        let Some(frame) = encode(envelope) else {
            return 0;
        };
        let delivered = self.bus.publish_role_local(role, &frame);
        self.forward(RelayTarget::Role(role), &frame);
        delivered
    }

    async fn broadcast(&self, envelope: &RealtimeEnvelope) -> usize {
        let Some(frame) = encode(envelope) else {
            return 0;
        };
        let delivered = self.bus.broadcast_local(&frame);
        self.forward(RelayTarget::All, &frame);
        delivered
    }
}
