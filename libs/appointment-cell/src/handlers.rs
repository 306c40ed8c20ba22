// libs/appointment-cell/src/handlers.rs
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AcceptAppointmentRequest, AppointmentListQuery, CreateAppointmentRequest, RejectAppointmentRequest,
    RescheduleRequestBody, ResolveRescheduleRequest, TransitionOutcome, UpdateAppointmentRequest,
    UpdateStatusRequest,
};
use crate::router::AppointmentState;

fn transition_body(outcome: TransitionOutcome) -> Json<Value> {
    Json(json!({
        "appointment": outcome.appointment,
        "notification_warning": outcome.notification_warning,
    }))
}

/// Accept and reject take an optional body; an empty one means defaults.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))
}

// ==============================================================================
// BOOKING
// ==============================================================================

pub async fn create_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let actor = user.actor()?;
    let input = request.into_domain()?;
    let outcome = state.machine.create(actor, input).await?;
    Ok((StatusCode::CREATED, transition_body(outcome)))
}

pub async fn list_appointments(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let appointments = state.machine.list_for_actor(actor, query.status).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len(),
    })))
}

pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let appointment = state.machine.get(actor, appointment_id).await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn get_modification_window(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let window = state.machine.modification_window(actor, appointment_id).await?;
    Ok(Json(json!(window)))
}

// ==============================================================================
// TRANSITIONS
// ==============================================================================

pub async fn update_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let changes = request.into_domain()?;
    let outcome = state.machine.modify(actor, appointment_id, changes).await?;
    Ok(transition_body(outcome))
}

pub async fn update_status(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let outcome = state
        .machine
        .update_status(actor, appointment_id, request.status)
        .await?;
    Ok(transition_body(outcome))
}

pub async fn accept_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let input = optional_body::<AcceptAppointmentRequest>(&body)?.into_domain()?;
    let outcome = state.machine.accept(actor, appointment_id, input).await?;
    Ok(transition_body(outcome))
}

pub async fn reject_appointment(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let notes = optional_body::<RejectAppointmentRequest>(&body)?.provider_notes;
    let outcome = state.machine.reject(actor, appointment_id, notes).await?;
    Ok(transition_body(outcome))
}

pub async fn request_reschedule(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleRequestBody>,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let proposal = request.into_domain()?;
    let outcome = state
        .machine
        .request_reschedule(actor, appointment_id, proposal)
        .await?;
    Ok(transition_body(outcome))
}

pub async fn resolve_reschedule(
    State(state): State<AppointmentState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ResolveRescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let decision = request.into_domain()?;
    let outcome = state
        .machine
        .resolve_reschedule(actor, appointment_id, decision)
        .await?;
    Ok(transition_body(outcome))
}
