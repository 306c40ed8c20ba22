use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_database::SupabaseClient;

use crate::error::NotificationError;
use crate::models::{InboxQuery, NewNotification, Notification};
use crate::services::store::NotificationStore;

const TABLE: &str = "/rest/v1/notifications";
const RETURN_ROWS: &str = "return=representation";

/// Notification log backed by the `notifications` table.
pub struct SupabaseNotificationStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseNotificationStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl NotificationStore for SupabaseNotificationStore {
    async fn append(&self, batch: Vec<NewNotification>) -> Result<Vec<Notification>, NotificationError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        // A bulk insert is a single statement, so the batch is all-or-nothing.
        let now = Utc::now();
        let rows: Vec<Notification> = batch
            .into_iter()
            .map(|row| row.into_notification(Uuid::new_v4(), now))
            .collect();
        let body = serde_json::to_value(&rows).map_err(|e| NotificationError::Storage(e.to_string()))?;

        let stored: Vec<Notification> = self
            .supabase
            .request(Method::POST, TABLE, Some(body), Some(RETURN_ROWS))
            .await?;

        debug!("Persisted {} notifications", stored.len());
        Ok(stored)
    }

    async fn list(&self, recipient_id: Uuid, query: InboxQuery) -> Result<Vec<Notification>, NotificationError> {
        let mut path = format!("{}?recipient_id=eq.{}", TABLE, recipient_id);
        if query.unread_only {
            path.push_str("&is_read=eq.false");
        }
        path.push_str(&format!("&order=created_at.desc&limit={}", query.effective_limit()));

        Ok(self.supabase.request(Method::GET, &path, None, None).await?)
    }

    async fn unread_count(&self, recipient_id: Uuid) -> Result<u64, NotificationError> {
        let path = format!("{}?recipient_id=eq.{}&is_read=eq.false&select=id", TABLE, recipient_id);
        let ids: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(ids.len() as u64)
    }

    async fn mark_read(&self, recipient_id: Uuid, notification_id: Uuid) -> Result<Notification, NotificationError> {
        let path = format!("{}?id=eq.{}&recipient_id=eq.{}", TABLE, notification_id, recipient_id);
        let rows: Vec<Notification> = self
            .supabase
            .request(Method::PATCH, &path, Some(json!({ "is_read": true })), Some(RETURN_ROWS))
            .await?;
        rows.into_iter()
            .next()
            .ok_or(NotificationError::NotFound(notification_id))
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64, NotificationError> {
        let path = format!("{}?recipient_id=eq.{}&is_read=eq.false&select=id", TABLE, recipient_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::PATCH, &path, Some(json!({ "is_read": true })), Some(RETURN_ROWS))
            .await?;
        Ok(rows.len() as u64)
    }

    async fn delete(&self, recipient_id: Uuid, notification_id: Uuid) -> Result<(), NotificationError> {
        let path = format!("{}?id=eq.{}&recipient_id=eq.{}&select=id", TABLE, notification_id, recipient_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::DELETE, &path, None, Some(RETURN_ROWS))
            .await?;
        if rows.is_empty() {
            return Err(NotificationError::NotFound(notification_id));
        }
        Ok(())
    }
}
