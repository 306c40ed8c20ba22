use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::NotificationError;
use crate::models::{InboxQuery, NewNotification, Notification};

/// Durable per-recipient notification log.
///
/// Every read and mutation is scoped to a recipient; a row that belongs to
/// someone else behaves as if it does not exist.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a batch atomically: either every row is stored or none is.
    async fn append(&self, batch: Vec<NewNotification>) -> Result<Vec<Notification>, NotificationError>;

    /// Newest first.
    async fn list(&self, recipient_id: Uuid, query: InboxQuery) -> Result<Vec<Notification>, NotificationError>;

    async fn unread_count(&self, recipient_id: Uuid) -> Result<u64, NotificationError>;

    /// Idempotent; a read row stays read.
    async fn mark_read(&self, recipient_id: Uuid, notification_id: Uuid) -> Result<Notification, NotificationError>;

    /// Returns how many rows flipped to read.
    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64, NotificationError>;

    async fn delete(&self, recipient_id: Uuid, notification_id: Uuid) -> Result<(), NotificationError>;
}

#[derive(Default)]
pub struct InMemoryNotificationStore {
    rows: RwLock<Vec<Notification>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn append(&self, batch: Vec<NewNotification>) -> Result<Vec<Notification>, NotificationError> {
        if let Some(bad) = batch.iter().find(|row| row.title.trim().is_empty()) {
            return Err(NotificationError::Validation(format!(
                "notification for {} has an empty title",
                bad.recipient_id
            )));
        }

        let now = Utc::now();
        let created: Vec<Notification> = batch
            .into_iter()
            .map(|row| row.into_notification(Uuid::new_v4(), now))
            .collect();

        self.rows.write().await.extend(created.iter().cloned());
        debug!("Stored {} notifications", created.len());
        Ok(created)
    }

    async fn list(&self, recipient_id: Uuid, query: InboxQuery) -> Result<Vec<Notification>, NotificationError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .rev()
            .filter(|row| row.recipient_id == recipient_id)
            .filter(|row| !query.unread_only || !row.is_read)
            .take(query.effective_limit())
            .cloned()
            .collect())
    }

    async fn unread_count(&self, recipient_id: Uuid) -> Result<u64, NotificationError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|row| row.recipient_id == recipient_id && !row.is_read)
            .count() as u64)
    }

    async fn mark_read(&self, recipient_id: Uuid, notification_id: Uuid) -> Result<Notification, NotificationError> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|row| row.id == notification_id && row.recipient_id == recipient_id)
            .ok_or(NotificationError::NotFound(notification_id))?;
        row.is_read = true;
        Ok(row.clone())
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64, NotificationError> {
        let mut rows = self.rows.write().await;
        let mut flipped = 0;
        for row in rows
            .iter_mut()
            .filter(|row| row.recipient_id == recipient_id && !row.is_read)
        {
            row.is_read = true;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn delete(&self, recipient_id: Uuid, notification_id: Uuid) -> Result<(), NotificationError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|row| !(row.id == notification_id && row.recipient_id == recipient_id));
        if rows.len() == before {
            return Err(NotificationError::NotFound(notification_id));
        }
        Ok(())
    }
}
