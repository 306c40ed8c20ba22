use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::DispatchError;
use crate::models::{DispatchReport, NewNotification, NotificationEvent, RealtimeEnvelope};
use crate::services::event_bus::RealtimePublisher;
use crate::services::store::NotificationStore;

const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(250);

/// Persists one inbox row per recipient, then pushes each row to the
/// recipient's live connection if there is one.
///
/// Persistence is the durable part: if it fails nothing is published and
/// the caller gets an error. Realtime delivery is best-effort and its
/// failures never surface.
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    publisher: Arc<dyn RealtimePublisher>,
    publish_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn NotificationStore>, publisher: Arc<dyn RealtimePublisher>) -> Self {
        Self {
            store,
            publisher,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    #[instrument(skip(self, event), fields(kind = %event.kind, recipients = event.recipients.len()))]
    pub async fn dispatch(&self, event: NotificationEvent) -> Result<DispatchReport, DispatchError> {
        let mut recipients = event.recipients.clone();
        recipients.sort_unstable();
        recipients.dedup();

        if recipients.is_empty() {
            return Ok(DispatchReport {
                notifications: Vec::new(),
                delivered: 0,
            });
        }

        let batch = recipients
            .iter()
            .map(|recipient_id| NewNotification {
                recipient_id: *recipient_id,
                kind: event.kind,
                title: event.title.clone(),
                body: event.body.clone(),
                related_entity: event.related_entity,
            })
            .collect();

        let notifications = self.store.append(batch).await?;

        let mut delivered = 0;
        for notification in &notifications {
            let envelope = RealtimeEnvelope::for_notification(notification, &event.payload);
            let publish = self.publisher.publish(notification.recipient_id, &envelope);
            match tokio::time::timeout(self.publish_timeout, publish).await {
                Ok(true) => delivered += 1,
                Ok(false) => debug!("Recipient {} is offline", notification.recipient_id),
                Err(_) => warn!("Realtime publish to {} timed out", notification.recipient_id),
            }
        }

        debug!("Dispatched {} notifications, {} delivered live", notifications.len(), delivered);
        Ok(DispatchReport {
            notifications,
            delivered,
        })
    }
}
