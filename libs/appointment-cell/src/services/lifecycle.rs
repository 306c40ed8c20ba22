// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use shared_models::auth::ActorRole;

use crate::models::{AppointmentError, AppointmentStatus};

/// Role-gated status table for generic status updates.
///
/// `reschedule_requested` has no entries here: it is entered through a
/// reschedule request and left only through its resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that `role` may move an appointment from `current_status` to `new_status`.
    pub fn validate_status_transition(
        &self,
        role: ActorRole,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition {} -> {} as {}", current_status, new_status, role);

        if current_status.is_terminal() {
            return Err(AppointmentError::AlreadyFinalized {
                current: current_status,
                attempted: new_status,
            });
        }

        if !self.get_valid_transitions(role, current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {} as {}", current_status, new_status, role);
            return Err(AppointmentError::InvalidTransition {
                from: current_status,
                to: new_status,
                role,
            });
        }

        Ok(())
    }

    /// Get all statuses `role` may move to from `current_status`.
    pub fn get_valid_transitions(&self, role: ActorRole, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        use AppointmentStatus::*;

        match (current_status, role) {
            (Pending, ActorRole::Provider) => vec![Accepted, Rejected, Cancelled],
            (Pending, ActorRole::Patient) => vec![Cancelled],
            (Accepted, ActorRole::Provider) => vec![Scheduled, Rescheduled, Cancelled, Completed],
            (Accepted, ActorRole::Patient) => vec![Cancelled],
            (Scheduled | Rescheduled, ActorRole::Provider) => vec![Cancelled, Completed],
            (Scheduled | Rescheduled, ActorRole::Patient) => vec![Cancelled],
            // Terminal states and the reschedule negotiation
            (RescheduleRequested | Completed | Rejected | Cancelled, _) => vec![],
        }
    }

    /// Statuses a patient may still edit the record in.
    pub fn is_patient_editable(&self, status: AppointmentStatus) -> bool {
        matches!(status, AppointmentStatus::Pending | AppointmentStatus::Accepted)
    }

    /// Statuses a reschedule may be requested from.
    pub fn can_request_reschedule(&self, status: AppointmentStatus) -> bool {
        matches!(status, AppointmentStatus::Scheduled | AppointmentStatus::Rescheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn provider_moves_pending_forward() {
        let lifecycle = AppointmentLifecycleService::new();
        for next in [AppointmentStatus::Accepted, AppointmentStatus::Rejected, AppointmentStatus::Cancelled] {
            assert!(lifecycle
                .validate_status_transition(ActorRole::Provider, AppointmentStatus::Pending, next)
                .is_ok());
        }
    }

    #[test]
    fn patient_may_only_cancel() {
        let lifecycle = AppointmentLifecycleService::new();
        for current in [AppointmentStatus::Pending, AppointmentStatus::Accepted, AppointmentStatus::Scheduled] {
            for next in AppointmentStatus::ALL {
                let result = lifecycle.validate_status_transition(ActorRole::Patient, current, next);
                assert_eq!(result.is_ok(), next == AppointmentStatus::Cancelled, "{} -> {}", current, next);
            }
        }
    }

    #[test]
    fn terminal_statuses_are_final_for_everyone() {
        let lifecycle = AppointmentLifecycleService::new();
        for current in [AppointmentStatus::Completed, AppointmentStatus::Rejected, AppointmentStatus::Cancelled] {
            for role in [ActorRole::Patient, ActorRole::Provider] {
                assert_matches!(
                    lifecycle.validate_status_transition(role, current, AppointmentStatus::Pending),
                    Err(AppointmentError::AlreadyFinalized { .. })
                );
            }
        }
    }

    #[test]
    fn reschedule_negotiation_is_not_a_generic_transition() {
        let lifecycle = AppointmentLifecycleService::new();
        assert_matches!(
            lifecycle.validate_status_transition(
                ActorRole::Provider,
                AppointmentStatus::RescheduleRequested,
                AppointmentStatus::Scheduled
            ),
            Err(AppointmentError::InvalidTransition { .. })
        );
        assert_matches!(
            lifecycle.validate_status_transition(
                ActorRole::Patient,
                AppointmentStatus::Scheduled,
                AppointmentStatus::RescheduleRequested
            ),
            Err(AppointmentError::InvalidTransition { .. })
        );
    }
}
