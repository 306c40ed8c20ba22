//! Notification text for appointment transitions.

use serde_json::json;
use uuid::Uuid;

use notification_cell::{NotificationEvent, NotificationKind, RelatedEntity};

use crate::models::{Appointment, AppointmentStatus, RescheduleAction};

fn or_generic(name: Option<&str>, generic: &str) -> String {
    name.map(str::to_string).unwrap_or_else(|| generic.to_string())
}

fn when(appointment: &Appointment) -> String {
    if appointment.time.is_tbd() {
        format!("{} (time to be confirmed)", appointment.date)
    } else {
        format!("{} at {}", appointment.date, appointment.time)
    }
}

fn event(
    kind: NotificationKind,
    recipient: Uuid,
    title: &str,
    body: String,
    appointment: &Appointment,
) -> NotificationEvent {
    NotificationEvent {
        kind,
        recipients: vec![recipient],
        title: title.to_string(),
        body,
        related_entity: Some(RelatedEntity::appointment(appointment.id)),
        payload: json!({ "appointment": appointment }),
    }
}

pub fn created(appointment: &Appointment, patient_name: Option<&str>) -> NotificationEvent {
    let body = format!(
        "{} requested a {} appointment on {}.",
        or_generic(patient_name, "A patient"),
        appointment.kind,
        when(appointment)
    );
    event(
        NotificationKind::AppointmentCreated,
        appointment.provider_id,
        "New appointment request",
        body,
        appointment,
    )
}

pub fn accepted(appointment: &Appointment, provider_name: Option<&str>) -> NotificationEvent {
    let body = format!(
        "{} accepted your appointment on {}. Location: {}.",
        or_generic(provider_name, "Your provider"),
        when(appointment),
        appointment.location
    );
    event(
        NotificationKind::AppointmentAccepted,
        appointment.patient_id,
        "Appointment accepted",
        body,
        appointment,
    )
}

pub fn rejected(appointment: &Appointment, provider_name: Option<&str>) -> NotificationEvent {
    let body = format!(
        "{} declined your appointment request for {}.",
        or_generic(provider_name, "Your provider"),
        when(appointment)
    );
    event(
        NotificationKind::AppointmentRejected,
        appointment.patient_id,
        "Appointment declined",
        body,
        appointment,
    )
}

pub fn status_changed(
    appointment: &Appointment,
    changed_by: Uuid,
    previous: AppointmentStatus,
    actor_name: Option<&str>,
) -> NotificationEvent {
    let body = format!(
        "{} changed your appointment on {} from {} to {}.",
        or_generic(actor_name, "The other participant"),
        when(appointment),
        previous,
        appointment.status
    );
    let mut notice = event(
        NotificationKind::AppointmentStatusChanged,
        appointment.counterparty(changed_by),
        "Appointment status changed",
        body,
        appointment,
    );
    notice.payload["previous_status"] = json!(previous);
    notice
}

pub fn updated(appointment: &Appointment, changed_by: Uuid, actor_name: Option<&str>) -> NotificationEvent {
    let body = format!(
        "{} updated the appointment now on {} (status: {}).",
        or_generic(actor_name, "The patient"),
        when(appointment),
        appointment.status
    );
    event(
        NotificationKind::AppointmentUpdated,
        appointment.counterparty(changed_by),
        "Appointment updated",
        body,
        appointment,
    )
}

pub fn reschedule_requested(appointment: &Appointment, patient_name: Option<&str>) -> NotificationEvent {
    let body = match &appointment.reschedule_request {
        Some(request) => format!(
            "{} asked to move the appointment on {} to {} at {}. Reason: {}",
            or_generic(patient_name, "A patient"),
            when(appointment),
            request.requested_date,
            request.requested_time,
            request.reason
        ),
        None => format!(
            "{} asked to reschedule the appointment on {}.",
            or_generic(patient_name, "A patient"),
            when(appointment)
        ),
    };
    event(
        NotificationKind::AppointmentRescheduleRequested,
        appointment.provider_id,
        "Reschedule requested",
        body,
        appointment,
    )
}

pub fn reschedule_resolved(
    appointment: &Appointment,
    action: RescheduleAction,
    provider_name: Option<&str>,
) -> NotificationEvent {
    let provider = or_generic(provider_name, "Your provider");
    let (title, body) = match action {
        RescheduleAction::Approve => (
            "Reschedule approved",
            format!("{} approved your reschedule. New time: {}.", provider, when(appointment)),
        ),
        RescheduleAction::Reject => (
            "Reschedule declined",
            format!(
                "{} declined your reschedule. Your appointment stays on {}.",
                provider,
                when(appointment)
            ),
        ),
    };
    let mut notice = event(
        NotificationKind::AppointmentRescheduleResolved,
        appointment.patient_id,
        title,
        body,
        appointment,
    );
    notice.payload["action"] = json!(action);
    notice
}
