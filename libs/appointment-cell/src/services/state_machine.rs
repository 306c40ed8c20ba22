// libs/appointment-cell/src/services/state_machine.rs
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use notification_cell::{NotificationDispatcher, NotificationEvent};
use shared_models::auth::{Actor, ActorRole};

use crate::models::{
    AcceptAppointment, Appointment, AppointmentChanges, AppointmentError, AppointmentStatus, ModificationWindow,
    NewAppointment, RescheduleAction, RescheduleDecision, RescheduleProposal, RescheduleRequest, SlotTime,
    TransitionOutcome, TBD,
};
use crate::services::clock::Clock;
use crate::services::conflict::ConflictChecker;
use crate::services::directory::{NoopDirectory, ParticipantDirectory};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notices;
use crate::services::store::{AppointmentStore, StoreError};
use crate::services::window;

/// Applies role-gated transitions to appointments and fans the result out
/// to the other participant.
///
/// Every write is a compare-and-swap on the record version, and every
/// slot-taking write is re-checked by the store, so a lost race surfaces as
/// `SlotUnavailable` or `ConcurrentModification` instead of a silent
/// overwrite.
pub struct AppointmentStateMachine {
    store: Arc<dyn AppointmentStore>,
    conflicts: ConflictChecker,
    lifecycle: AppointmentLifecycleService,
    clock: Arc<dyn Clock>,
    dispatcher: NotificationDispatcher,
    directory: Arc<dyn ParticipantDirectory>,
}

impl AppointmentStateMachine {
    pub fn new(store: Arc<dyn AppointmentStore>, clock: Arc<dyn Clock>, dispatcher: NotificationDispatcher) -> Self {
        Self {
            conflicts: ConflictChecker::new(store.clone()),
            store,
            lifecycle: AppointmentLifecycleService::new(),
            clock,
            dispatcher,
            directory: Arc::new(NoopDirectory),
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn ParticipantDirectory>) -> Self {
        self.directory = directory;
        self
    }

    // ==========================================================================
    // TRANSITIONS
    // ==========================================================================

    #[instrument(skip(self))]
    pub async fn create(&self, actor: Actor, input: NewAppointment) -> Result<TransitionOutcome, AppointmentError> {
        if actor.role != ActorRole::Patient {
            return Err(AppointmentError::Forbidden("only patients can book appointments".to_string()));
        }

        let reason = require_text("reason", &input.reason)?;
        let now = self.clock.now();
        require_future(input.date, input.time, now)?;
        self.conflicts
            .ensure_available(input.provider_id, input.date, input.time, None)
            .await?;

        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: actor.id,
            provider_id: input.provider_id,
            date: input.date,
            time: input.time,
            location: non_blank(input.location).unwrap_or_else(|| TBD.to_string()),
            kind: input.kind,
            status: AppointmentStatus::Pending,
            reason,
            provider_notes: None,
            patient_notes: non_blank(input.patient_notes),
            reschedule_request: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let stored = self.store.insert(appointment).await.map_err(|e| match e {
            StoreError::SlotTaken => AppointmentError::SlotUnavailable {
                provider_id: input.provider_id,
                date: input.date,
                time: input.time,
            },
            other => AppointmentError::Storage(other.to_string()),
        })?;

        info!(appointment_id = %stored.id, provider_id = %stored.provider_id, "Appointment requested");
        let patient_name = self.directory.display_name(actor).await;
        let warning = self.notify(notices::created(&stored, patient_name.as_deref())).await;
        Ok(outcome(stored, warning))
    }

    #[instrument(skip(self))]
    pub async fn accept(
        &self,
        actor: Actor,
        id: Uuid,
        input: AcceptAppointment,
    ) -> Result<TransitionOutcome, AppointmentError> {
        let mut appointment = self.load_as_party(actor, id).await?;
        require_role(actor, ActorRole::Provider, "accept appointments")?;
        self.require_pending(actor, &appointment, AppointmentStatus::Accepted)?;

        let date = input.date.unwrap_or(appointment.date);
        let time = input.time.unwrap_or(appointment.time);
        if (date, time) != (appointment.date, appointment.time) {
            require_future(date, time, self.clock.now())?;
            self.conflicts
                .ensure_available(appointment.provider_id, date, time, Some(appointment.id))
                .await?;
            appointment.date = date;
            appointment.time = time;
        }
        if let Some(location) = non_blank(input.location) {
            appointment.location = location;
        }
        if let Some(notes) = non_blank(input.provider_notes) {
            appointment.provider_notes = Some(notes);
        }
        appointment.status = AppointmentStatus::Accepted;

        let stored = self.commit(appointment).await?;
        info!(appointment_id = %stored.id, "Appointment accepted");
        let provider_name = self.directory.display_name(actor).await;
        let warning = self.notify(notices::accepted(&stored, provider_name.as_deref())).await;
        Ok(outcome(stored, warning))
    }

    #[instrument(skip(self))]
    pub async fn reject(
        &self,
        actor: Actor,
        id: Uuid,
        provider_notes: Option<String>,
    ) -> Result<TransitionOutcome, AppointmentError> {
        let mut appointment = self.load_as_party(actor, id).await?;
        require_role(actor, ActorRole::Provider, "reject appointments")?;
        self.require_pending(actor, &appointment, AppointmentStatus::Rejected)?;

        if let Some(notes) = non_blank(provider_notes) {
            appointment.provider_notes = Some(notes);
        }
        appointment.status = AppointmentStatus::Rejected;

        let stored = self.commit(appointment).await?;
        info!(appointment_id = %stored.id, "Appointment rejected");
        let provider_name = self.directory.display_name(actor).await;
        let warning = self.notify(notices::rejected(&stored, provider_name.as_deref())).await;
        Ok(outcome(stored, warning))
    }

    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        actor: Actor,
        id: Uuid,
        new_status: AppointmentStatus,
    ) -> Result<TransitionOutcome, AppointmentError> {
        let mut appointment = self.load_as_party(actor, id).await?;
        let previous = appointment.status;
        self.lifecycle
            .validate_status_transition(actor.role, previous, new_status)?;

        if matches!(new_status, AppointmentStatus::Scheduled | AppointmentStatus::Rescheduled)
            && appointment.time.is_tbd()
        {
            return Err(AppointmentError::Validation(format!(
                "a time must be set before the appointment can be {}",
                new_status
            )));
        }

        appointment.status = new_status;
        let stored = self.commit(appointment).await?;
        info!(appointment_id = %stored.id, from = %previous, to = %new_status, "Appointment status updated");

        let actor_name = self.directory.display_name(actor).await;
        let notice = notices::status_changed(&stored, actor.id, previous, actor_name.as_deref());
        let warning = self.notify(notice).await;
        Ok(outcome(stored, warning))
    }

    /// Patient edits. Moving an accepted appointment to a different slot
    /// sends it back to `pending` for the provider to confirm again.
    #[instrument(skip(self))]
    pub async fn modify(
        &self,
        actor: Actor,
        id: Uuid,
        changes: AppointmentChanges,
    ) -> Result<TransitionOutcome, AppointmentError> {
        let mut appointment = self.load_as_party(actor, id).await?;
        require_role(actor, ActorRole::Patient, "edit appointments")?;

        let current = appointment.status;
        let attempted = changes.status.unwrap_or(AppointmentStatus::Pending);
        if current.is_terminal() {
            return Err(AppointmentError::AlreadyFinalized { current, attempted });
        }
        self.require_open_window(&appointment)?;
        if !self.lifecycle.is_patient_editable(current) {
            return Err(AppointmentError::InvalidTransition {
                from: current,
                to: attempted,
                role: actor.role,
            });
        }
        if changes.is_empty() {
            return Err(AppointmentError::Validation("no changes supplied".to_string()));
        }

        let cancelling = match changes.status {
            Some(AppointmentStatus::Cancelled) => true,
            Some(status) if status == current || status == AppointmentStatus::Pending => false,
            Some(status) => {
                return Err(AppointmentError::InvalidTransition {
                    from: current,
                    to: status,
                    role: actor.role,
                })
            }
            None => false,
        };

        if let Some(reason) = &changes.reason {
            appointment.reason = require_text("reason", reason)?;
        }
        if let Some(kind) = changes.kind {
            appointment.kind = kind;
        }
        if let Some(location) = non_blank(changes.location) {
            appointment.location = location;
        }
        if changes.patient_notes.is_some() {
            appointment.patient_notes = non_blank(changes.patient_notes);
        }

        // A cancelled record keeps the slot it was cancelled from.
        let date = changes.date.filter(|_| !cancelling).unwrap_or(appointment.date);
        let time = changes.time.filter(|_| !cancelling).unwrap_or(appointment.time);
        let slot_changed = (date, time) != (appointment.date, appointment.time);
        if slot_changed {
            require_future(date, time, self.clock.now())?;
            self.conflicts
                .ensure_available(appointment.provider_id, date, time, Some(appointment.id))
                .await?;
        }
        appointment.date = date;
        appointment.time = time;

        appointment.status = if cancelling {
            AppointmentStatus::Cancelled
        } else if slot_changed || changes.status == Some(AppointmentStatus::Pending) {
            AppointmentStatus::Pending
        } else {
            current
        };

        let stored = self.commit(appointment).await?;
        info!(appointment_id = %stored.id, status = %stored.status, "Appointment modified");

        let actor_name = self.directory.display_name(actor).await;
        let notice = if stored.status != current {
            notices::status_changed(&stored, actor.id, current, actor_name.as_deref())
        } else {
            notices::updated(&stored, actor.id, actor_name.as_deref())
        };
        let warning = self.notify(notice).await;
        Ok(outcome(stored, warning))
    }

    #[instrument(skip(self))]
    pub async fn request_reschedule(
        &self,
        actor: Actor,
        id: Uuid,
        proposal: RescheduleProposal,
    ) -> Result<TransitionOutcome, AppointmentError> {
        let mut appointment = self.load_as_party(actor, id).await?;
        require_role(actor, ActorRole::Patient, "request a reschedule")?;

        let current = appointment.status;
        let attempted = AppointmentStatus::RescheduleRequested;
        if current.is_terminal() {
            return Err(AppointmentError::AlreadyFinalized { current, attempted });
        }
        self.require_open_window(&appointment)?;
        if !self.lifecycle.can_request_reschedule(current) {
            return Err(AppointmentError::InvalidTransition {
                from: current,
                to: attempted,
                role: actor.role,
            });
        }

        if proposal.time.is_tbd() {
            return Err(AppointmentError::Validation("requested_time must be a concrete HH:MM".to_string()));
        }
        let reason = require_text("reason", &proposal.reason)?;
        let now = self.clock.now();
        require_future(proposal.date, proposal.time, now)?;
        if (proposal.date, proposal.time) == (appointment.date, appointment.time) {
            return Err(AppointmentError::Validation(
                "requested slot is the appointment's current slot".to_string(),
            ));
        }

        appointment.reschedule_request = Some(RescheduleRequest {
            requested_date: proposal.date,
            requested_time: proposal.time,
            reason,
            requested_at: now,
        });
        appointment.status = attempted;

        let stored = self.commit(appointment).await?;
        info!(appointment_id = %stored.id, "Reschedule requested");
        let patient_name = self.directory.display_name(actor).await;
        let warning = self
            .notify(notices::reschedule_requested(&stored, patient_name.as_deref()))
            .await;
        Ok(outcome(stored, warning))
    }

    #[instrument(skip(self))]
    pub async fn resolve_reschedule(
        &self,
        actor: Actor,
        id: Uuid,
        decision: RescheduleDecision,
    ) -> Result<TransitionOutcome, AppointmentError> {
        let mut appointment = self.load_as_party(actor, id).await?;
        require_role(actor, ActorRole::Provider, "resolve reschedule requests")?;

        let current = appointment.status;
        if current.is_terminal() {
            return Err(AppointmentError::AlreadyFinalized {
                current,
                attempted: AppointmentStatus::Scheduled,
            });
        }
        if current != AppointmentStatus::RescheduleRequested {
            return Err(AppointmentError::InvalidTransition {
                from: current,
                to: AppointmentStatus::Scheduled,
                role: actor.role,
            });
        }
        let request = appointment.reschedule_request.take().ok_or_else(|| {
            AppointmentError::Storage(format!("appointment {} has no pending reschedule request", id))
        })?;

        match decision.action {
            RescheduleAction::Approve => {
                let date = decision.override_date.unwrap_or(request.requested_date);
                let time = decision.override_time.unwrap_or(request.requested_time);
                if time.is_tbd() {
                    return Err(AppointmentError::Validation(
                        "an approved reschedule needs a concrete time".to_string(),
                    ));
                }
                require_future(date, time, self.clock.now())?;
                self.conflicts
                    .ensure_available(appointment.provider_id, date, time, Some(appointment.id))
                    .await?;
                appointment.date = date;
                appointment.time = time;
                appointment.status = AppointmentStatus::Scheduled;
            }
            RescheduleAction::Reject => {
                appointment.status = if appointment.time.is_tbd() {
                    AppointmentStatus::Accepted
                } else {
                    AppointmentStatus::Scheduled
                };
            }
        }

        let stored = self.commit(appointment).await?;
        info!(appointment_id = %stored.id, action = ?decision.action, status = %stored.status, "Reschedule resolved");
        let provider_name = self.directory.display_name(actor).await;
        let warning = self
            .notify(notices::reschedule_resolved(&stored, decision.action, provider_name.as_deref()))
            .await;
        Ok(outcome(stored, warning))
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get(&self, actor: Actor, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.load_as_party(actor, id).await
    }

    pub async fn list_for_actor(
        &self,
        actor: Actor,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.store
            .list_for_actor(actor, status)
            .await
            .map_err(|e| AppointmentError::Storage(e.to_string()))
    }

    pub async fn modification_window(&self, actor: Actor, id: Uuid) -> Result<ModificationWindow, AppointmentError> {
        let appointment = self.load_as_party(actor, id).await?;
        Ok(window::modification_window(&appointment, self.clock.now()))
    }

    /// Evaluated against the clock at call time.
    pub fn can_be_modified(&self, appointment: &Appointment) -> bool {
        window::can_be_modified(appointment, self.clock.now())
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn load_as_party(&self, actor: Actor, id: Uuid) -> Result<Appointment, AppointmentError> {
        let appointment = self
            .store
            .get(id)
            .await
            .map_err(|e| AppointmentError::Storage(e.to_string()))?
            .ok_or(AppointmentError::NotFound(id))?;

        let is_party = match actor.role {
            ActorRole::Patient => appointment.patient_id == actor.id,
            ActorRole::Provider => appointment.provider_id == actor.id,
        };
        if !is_party {
            warn!(appointment_id = %id, actor_id = %actor.id, "Access by non-participant refused");
            return Err(AppointmentError::Forbidden(
                "only the appointment's patient and provider may access it".to_string(),
            ));
        }
        Ok(appointment)
    }

    fn require_pending(
        &self,
        actor: Actor,
        appointment: &Appointment,
        attempted: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        let current = appointment.status;
        if current.is_terminal() {
            return Err(AppointmentError::AlreadyFinalized { current, attempted });
        }
        if current != AppointmentStatus::Pending {
            return Err(AppointmentError::InvalidTransition {
                from: current,
                to: attempted,
                role: actor.role,
            });
        }
        Ok(())
    }

    fn require_open_window(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        let window = window::modification_window(appointment, self.clock.now());
        if !window.can_be_modified {
            debug!(appointment_id = %appointment.id, hours_until = window.hours_until, "Modification window closed");
            return Err(AppointmentError::ModificationWindowClosed {
                hours_until: window.hours_until,
            });
        }
        Ok(())
    }

    /// Versioned write of a mutated record loaded earlier in the call.
    async fn commit(&self, mut appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let expected = appointment.version;
        appointment.updated_at = self.clock.now().max(appointment.updated_at);

        let (id, provider_id, date, time) = (appointment.id, appointment.provider_id, appointment.date, appointment.time);
        self.store.update(expected, appointment).await.map_err(|e| match e {
            StoreError::SlotTaken => AppointmentError::SlotUnavailable { provider_id, date, time },
            StoreError::VersionConflict { .. } => AppointmentError::ConcurrentModification(id),
            StoreError::NotFound(_) => AppointmentError::NotFound(id),
            other => AppointmentError::Storage(other.to_string()),
        })
    }

    /// Dispatch failures never undo a committed transition; they come back
    /// as a warning for the caller.
    async fn notify(&self, event: NotificationEvent) -> Option<String> {
        match self.dispatcher.dispatch(event).await {
            Ok(report) => {
                debug!("Notified {} recipients ({} live)", report.notifications.len(), report.delivered);
                None
            }
            Err(e) => {
                warn!("Appointment committed but notification failed: {}", e);
                Some(e.to_string())
            }
        }
    }
}

fn outcome(appointment: Appointment, notification_warning: Option<String>) -> TransitionOutcome {
    TransitionOutcome {
        appointment,
        notification_warning,
    }
}

fn require_role(actor: Actor, role: ActorRole, action: &str) -> Result<(), AppointmentError> {
    if actor.role != role {
        return Err(AppointmentError::Forbidden(format!("only the {} may {}", role, action)));
    }
    Ok(())
}

fn require_future(date: NaiveDate, time: SlotTime, now: DateTime<Utc>) -> Result<(), AppointmentError> {
    if !window::is_in_future(date, time, now) {
        return Err(AppointmentError::Validation(format!(
            "appointment slot {} {} is not in the future",
            date, time
        )));
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> Result<String, AppointmentError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppointmentError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
