use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{AppointmentError, SlotTime};
use crate::services::store::AppointmentStore;

/// Read-side slot check. It gives callers an early, descriptive
/// `SlotUnavailable`; the store's own uniqueness check on write is what
/// makes the rule hold under races.
#[derive(Clone)]
pub struct ConflictChecker {
    store: Arc<dyn AppointmentStore>,
}

impl ConflictChecker {
    pub fn new(store: Arc<dyn AppointmentStore>) -> Self {
        Self { store }
    }

    pub async fn is_available(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        time: SlotTime,
        exclude: Option<Uuid>,
    ) -> Result<bool, AppointmentError> {
        let holder = self
            .store
            .find_slot_holder(provider_id, date, time, exclude)
            .await
            .map_err(|e| AppointmentError::Storage(e.to_string()))?;

        if let Some(holder) = holder {
            debug!("Slot {} {} for provider {} held by {}", date, time, provider_id, holder);
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn ensure_available(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        time: SlotTime,
        exclude: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        if self.is_available(provider_id, date, time, exclude).await? {
            return Ok(());
        }

        warn!("Conflict detected for provider {} at {} {}", provider_id, date, time);
        Err(AppointmentError::SlotUnavailable { provider_id, date, time })
    }
}
