use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::{DatabaseError, SupabaseClient};
use shared_models::auth::{Actor, ActorRole};

use crate::models::{Appointment, AppointmentStatus, SlotTime};
use crate::services::store::{AppointmentStore, StoreError};

const TABLE: &str = "/rest/v1/appointments";
const RETURN_ROWS: &str = "return=representation";

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Uuid,
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            // The partial unique index on (provider_id, date, time) fired.
            DatabaseError::Conflict(_) => StoreError::SlotTaken,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Appointment records in the `appointments` table.
///
/// Slot exclusivity comes from the partial unique index shipped in
/// `migrations/001_appointments.sql`; versioned updates filter on
/// `version=eq.<expected>`.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn slot_holding_filter() -> String {
        let statuses = AppointmentStatus::SLOT_HOLDING
            .iter()
            .map(AppointmentStatus::as_str)
            .collect::<Vec<_>>()
            .join(",");
        format!("in.({})", statuses)
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let body = serde_json::to_value(&appointment).map_err(|e| StoreError::Backend(e.to_string()))?;

        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::POST, TABLE, Some(body), Some(RETURN_ROWS))
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("insert returned no row".to_string()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let path = format!("{}?id=eq.{}", TABLE, id);
        let rows: Vec<Appointment> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next())
    }

    async fn update(&self, expected_version: u64, mut appointment: Appointment) -> Result<Appointment, StoreError> {
        let id = appointment.id;
        appointment.version = expected_version + 1;
        let body = serde_json::to_value(&appointment).map_err(|e| StoreError::Backend(e.to_string()))?;

        let path = format!("{}?id=eq.{}&version=eq.{}", TABLE, id, expected_version);
        let rows: Vec<Appointment> = self
            .supabase
            .request(Method::PATCH, &path, Some(body), Some(RETURN_ROWS))
            .await?;

        if let Some(stored) = rows.into_iter().next() {
            debug!("Updated appointment {} to version {}", id, stored.version);
            return Ok(stored);
        }

        // Nothing matched: either the row moved on or it never existed.
        match self.get(id).await? {
            Some(_) => {
                warn!("Version conflict updating appointment {}", id);
                Err(StoreError::VersionConflict {
                    id,
                    expected: expected_version,
                })
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn list_for_actor(
        &self,
        actor: Actor,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let column = match actor.role {
            ActorRole::Patient => "patient_id",
            ActorRole::Provider => "provider_id",
        };
        let mut path = format!("{}?{}=eq.{}", TABLE, column, actor.id);
        if let Some(status) = status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        path.push_str("&order=date.desc,time.desc,created_at.desc");

        Ok(self.supabase.request(Method::GET, &path, None, None).await?)
    }

    async fn find_slot_holder(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        time: SlotTime,
        exclude: Option<Uuid>,
    ) -> Result<Option<Uuid>, StoreError> {
        let mut path = format!(
            "{}?provider_id=eq.{}&date=eq.{}&time=eq.{}&status={}&select=id&limit=1",
            TABLE,
            provider_id,
            date,
            time,
            Self::slot_holding_filter()
        );
        if let Some(exclude) = exclude {
            path.push_str(&format!("&id=neq.{}", exclude));
        }

        let rows: Vec<IdRow> = self.supabase.request(Method::GET, &path, None, None).await?;
        Ok(rows.into_iter().next().map(|row| row.id))
    }
}
