use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::{Actor, ActorRole};

use crate::models::RealtimeEnvelope;

pub const DEFAULT_BUFFER: usize = 64;

/// Fire-and-forget delivery to connected actors.
///
/// Implementations must never block on a slow consumer; a frame that
/// cannot be queued is dropped.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimePublisher: Send + Sync {
    /// Returns whether a local connection accepted the frame.
    async fn publish(&self, actor_id: Uuid, envelope: &RealtimeEnvelope) -> bool;

    async fn publish_to_role(&self, role: ActorRole, envelope: &RealtimeEnvelope) -> usize;

    async fn broadcast(&self, envelope: &RealtimeEnvelope) -> usize;
}

struct Registration {
    connection_id: Uuid,
    role: ActorRole,
    sender: mpsc::Sender<Arc<str>>,
}

#[derive(Default)]
struct Registry {
    actors: DashMap<Uuid, Registration>,
    roles: DashMap<ActorRole, DashMap<Uuid, Uuid>>,
}

impl Registry {
    /// Remove the actor only if the registration still belongs to
    /// `connection_id`; a newer connection for the same actor is left alone.
    fn leave(&self, actor_id: Uuid, connection_id: Uuid) {
        let removed = self
            .actors
            .remove_if(&actor_id, |_, registration| registration.connection_id == connection_id);

        if let Some((_, registration)) = removed {
            if let Some(members) = self.roles.get(&registration.role) {
                members.remove_if(&actor_id, |_, conn| *conn == connection_id);
            }
            debug!("Actor {} left realtime channel", actor_id);
        }
    }

    fn deliver(&self, actor_id: Uuid, frame: &Arc<str>) -> bool {
        let Some(registration) = self.actors.get(&actor_id) else {
            return false;
        };

        match registration.sender.try_send(Arc::clone(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Realtime buffer full for actor {}, dropping frame", actor_id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// In-process registry of live connections keyed by actor.
///
/// Each actor holds at most one connection; joining again replaces the
/// previous one, whose receiver then ends.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Registry>,
    buffer: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            buffer: buffer.max(1),
        }
    }

    /// Register `actor` and return the handle its connection reads from.
    /// Dropping the handle leaves the channel.
    pub fn join(&self, actor: Actor) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let connection_id = Uuid::new_v4();

        let previous = self.registry.actors.insert(
            actor.id,
            Registration {
                connection_id,
                role: actor.role,
                sender,
            },
        );

        if let Some(previous) = previous {
            if previous.role != actor.role {
                if let Some(members) = self.registry.roles.get(&previous.role) {
                    members.remove(&actor.id);
                }
            }
            debug!("Actor {} reconnected, replacing previous connection", actor.id);
        }

        self.registry
            .roles
            .entry(actor.role)
            .or_default()
            .insert(actor.id, connection_id);

        debug!("Actor {} joined realtime channel as {}", actor.id, actor.role);

        Subscription {
            actor,
            connection_id,
            receiver,
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn is_online(&self, actor_id: Uuid) -> bool {
        self.registry.actors.contains_key(&actor_id)
    }

    pub fn online_count(&self) -> usize {
        self.registry.actors.len()
    }

    pub fn members_of(&self, role: ActorRole) -> Vec<Uuid> {
        self.registry
            .roles
            .get(&role)
            .map(|members| members.iter().map(|entry| *entry.key()).collect())
            .unwrap_or_default()
    }

    pub fn publish_local(&self, actor_id: Uuid, frame: &Arc<str>) -> bool {
        self.registry.deliver(actor_id, frame)
    }

    pub fn publish_role_local(&self, role: ActorRole, frame: &Arc<str>) -> usize {
        self.members_of(role)
            .into_iter()
            .filter(|actor_id| self.registry.deliver(*actor_id, frame))
            .count()
    }

    pub fn broadcast_local(&self, frame: &Arc<str>) -> usize {
        let actor_ids: Vec<Uuid> = self.registry.actors.iter().map(|entry| *entry.key()).collect();
        actor_ids
            .into_iter()
            .filter(|actor_id| self.registry.deliver(*actor_id, frame))
            .count()
    }
}

pub(crate) fn encode(envelope: &RealtimeEnvelope) -> Option<Arc<str>> {
    match envelope.to_message() {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            warn!("Failed to encode realtime frame {}: {}", envelope.event, e);
            None
        }
    }
}

#[async_trait]
impl RealtimePublisher for EventBus {
    async fn publish(&self, actor_id: Uuid, envelope: &RealtimeEnvelope) -> bool {
        encode(envelope).is_some_and(|frame| self.publish_local(actor_id, &frame))
    }

    async fn publish_to_role(&self, role: ActorRole, envelope: &RealtimeEnvelope) -> usize {
        encode(envelope).map_or(0, |frame| self.publish_role_local(role, &frame))
    }

    async fn broadcast(&self, envelope: &RealtimeEnvelope) -> usize {
        encode(envelope).map_or(0, |frame| self.broadcast_local(&frame))
    }
}

/// A live registration on the [`EventBus`].
pub struct Subscription {
    actor: Actor,
    connection_id: Uuid,
    receiver: mpsc::Receiver<Arc<str>>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn actor(&self) -> Actor {
        self.actor
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// `None` once the registration was replaced by a newer connection.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.leave(self.actor.id, self.connection_id);
    }
}
