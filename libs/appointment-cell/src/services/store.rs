use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{Actor, ActorRole};

use crate::models::{Appointment, AppointmentStatus, SlotKey, SlotTime};

#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    /// The slot uniqueness backstop rejected the write.
    #[error("slot is already held by another appointment")]
    SlotTaken,

    #[error("appointment {id} is no longer at version {expected}")]
    VersionConflict { id: Uuid, expected: u64 },

    #[error("appointment {0} does not exist")]
    NotFound(Uuid),

    #[error("appointment {0} already exists")]
    Duplicate(Uuid),

    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Durable appointment records.
///
/// Writers must enforce two things atomically with the write itself: at
/// most one slot-holding record per [`SlotKey`], and compare-and-swap on
/// `version` for updates.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Replace the record if it is still at `expected_version`. The stored
    /// copy gets `expected_version + 1`.
    async fn update(&self, expected_version: u64, appointment: Appointment) -> Result<Appointment, StoreError>;

    /// Records where `actor` is the patient or the provider, latest date first.
    async fn list_for_actor(
        &self,
        actor: Actor,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Id of the slot-holding record at this slot, ignoring `exclude`.
    async fn find_slot_holder(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        time: SlotTime,
        exclude: Option<Uuid>,
    ) -> Result<Option<Uuid>, StoreError>;
}

#[derive(Default)]
struct Inner {
    appointments: HashMap<Uuid, Appointment>,
    slots: HashMap<SlotKey, Uuid>,
}

impl Inner {
    fn slot_free_for(&self, key: &SlotKey, id: Uuid) -> bool {
        self.slots.get(key).map_or(true, |holder| *holder == id)
    }
}

/// Process-local store. A single write lock covers the slot index and the
/// records, so check and write cannot interleave.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    inner: RwLock<Inner>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut inner = self.inner.write().await;

        if inner.appointments.contains_key(&appointment.id) {
            return Err(StoreError::Duplicate(appointment.id));
        }
        if let Some(key) = appointment.slot_key() {
            if !inner.slot_free_for(&key, appointment.id) {
                return Err(StoreError::SlotTaken);
            }
            inner.slots.insert(key, appointment.id);
        }

        inner.appointments.insert(appointment.id, appointment.clone());
        debug!("Inserted appointment {}", appointment.id);
        Ok(appointment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.inner.read().await.appointments.get(&id).cloned())
    }

    async fn update(&self, expected_version: u64, mut appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut inner = self.inner.write().await;
        let id = appointment.id;

        let previous_key = {
            let current = inner.appointments.get(&id).ok_or(StoreError::NotFound(id))?;
            if current.version != expected_version {
                return Err(StoreError::VersionConflict {
                    id,
                    expected: expected_version,
                });
            }
            current.slot_key()
        };

        let next_key = appointment.slot_key();
        if let Some(key) = &next_key {
            if !inner.slot_free_for(key, id) {
                return Err(StoreError::SlotTaken);
            }
        }

        if let Some(key) = previous_key {
            if inner.slots.get(&key) == Some(&id) {
                inner.slots.remove(&key);
            }
        }
        if let Some(key) = next_key {
            inner.slots.insert(key, id);
        }

        appointment.version = expected_version + 1;
        inner.appointments.insert(id, appointment.clone());
        debug!("Updated appointment {} to version {}", id, appointment.version);
        Ok(appointment)
    }

    async fn list_for_actor(
        &self,
        actor: Actor,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let inner = self.inner.read().await;
        let mut appointments: Vec<Appointment> = inner
            .appointments
            .values()
            .filter(|appointment| match actor.role {
                ActorRole::Patient => appointment.patient_id == actor.id,
                ActorRole::Provider => appointment.provider_id == actor.id,
            })
            .filter(|appointment| status.map_or(true, |status| appointment.status == status))
            .cloned()
            .collect();

        appointments.sort_by(|a, b| {
            (b.date, b.time.time(), b.created_at).cmp(&(a.date, a.time.time(), a.created_at))
        });
        Ok(appointments)
    }

    async fn find_slot_holder(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        time: SlotTime,
        exclude: Option<Uuid>,
    ) -> Result<Option<Uuid>, StoreError> {
        let key = SlotKey { provider_id, date, time };
        let inner = self.inner.read().await;
        Ok(inner.slots.get(&key).copied().filter(|holder| Some(*holder) != exclude))
    }
}
