use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use shared_models::auth::Actor;

// ==============================================================================
// NOTIFICATION RECORDS
// ==============================================================================

/// Event categories a notification can be created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "appointment.created")]
    AppointmentCreated,
    #[serde(rename = "appointment.accepted")]
    AppointmentAccepted,
    #[serde(rename = "appointment.rejected")]
    AppointmentRejected,
    #[serde(rename = "appointment.status_changed")]
    AppointmentStatusChanged,
    #[serde(rename = "appointment.updated")]
    AppointmentUpdated,
    #[serde(rename = "appointment.reschedule_requested")]
    AppointmentRescheduleRequested,
    #[serde(rename = "appointment.reschedule_resolved")]
    AppointmentRescheduleResolved,
    #[serde(rename = "general")]
    General,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::AppointmentCreated => "appointment.created",
            NotificationKind::AppointmentAccepted => "appointment.accepted",
            NotificationKind::AppointmentRejected => "appointment.rejected",
            NotificationKind::AppointmentStatusChanged => "appointment.status_changed",
            NotificationKind::AppointmentUpdated => "appointment.updated",
            NotificationKind::AppointmentRescheduleRequested => "appointment.reschedule_requested",
            NotificationKind::AppointmentRescheduleResolved => "appointment.reschedule_resolved",
            NotificationKind::General => "general",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedEntityKind {
    Appointment,
    MedicalRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub id: Uuid,
    pub kind: RelatedEntityKind,
}

impl RelatedEntity {
    pub fn appointment(id: Uuid) -> Self {
        Self {
            id,
            kind: RelatedEntityKind::Appointment,
        }
    }
}

/// A persisted inbox row. Only `is_read` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub is_read: bool,
    pub related_entity_id: Option<Uuid>,
    pub related_entity_kind: Option<RelatedEntityKind>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn related_entity(&self) -> Option<RelatedEntity> {
        match (self.related_entity_id, self.related_entity_kind) {
            (Some(id), Some(kind)) => Some(RelatedEntity { id, kind }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub related_entity: Option<RelatedEntity>,
}

impl NewNotification {
    pub fn into_notification(self, id: Uuid, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id,
            recipient_id: self.recipient_id,
            kind: self.kind,
            title: self.title,
            body: self.body,
            is_read: false,
            related_entity_id: self.related_entity.map(|entity| entity.id),
            related_entity_kind: self.related_entity.map(|entity| entity.kind),
            created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboxQuery {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default = "InboxQuery::default_limit")]
    pub limit: usize,
}

impl InboxQuery {
    pub const MAX_LIMIT: usize = 200;

    fn default_limit() -> usize {
        50
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }
}

impl Default for InboxQuery {
    fn default() -> Self {
        Self {
            unread_only: false,
            limit: Self::default_limit(),
        }
    }
}

// ==============================================================================
// DISPATCH
// ==============================================================================

/// One logical event to fan out to a set of recipients.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub recipients: Vec<Uuid>,
    pub title: String,
    pub body: String,
    pub related_entity: Option<RelatedEntity>,
    /// Extra data pushed over the realtime channel only; never persisted.
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub notifications: Vec<Notification>,
    pub delivered: usize,
}

// ==============================================================================
// REALTIME FRAMES
// ==============================================================================

pub const CONNECTED_EVENT: &str = "connected";

/// JSON frame written to a realtime connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEnvelope {
    pub event: String,
    pub data: Value,
    pub sent_at: DateTime<Utc>,
}

impl RealtimeEnvelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            sent_at: Utc::now(),
        }
    }

    pub fn for_notification(notification: &Notification, payload: &Value) -> Self {
        Self::new(
            notification.kind.as_str(),
            serde_json::json!({
                "notification": notification,
                "payload": payload,
            }),
        )
    }

    pub fn connected(actor: &Actor, unread_count: u64) -> Self {
        Self::new(
            CONNECTED_EVENT,
            serde_json::json!({
                "actor_id": actor.id,
                "role": actor.role,
                "unread_count": unread_count,
            }),
        )
    }

    pub fn to_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
