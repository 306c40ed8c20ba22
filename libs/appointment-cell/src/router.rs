// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::state_machine::AppointmentStateMachine;

#[derive(Clone)]
pub struct AppointmentState {
    pub machine: Arc<AppointmentStateMachine>,
    pub config: Arc<AppConfig>,
}

pub fn appointment_routes(state: AppointmentState) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::create_appointment).get(handlers::list_appointments))
        .route("/{appointment_id}", get(handlers::get_appointment).put(handlers::update_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_status))
        .route("/{appointment_id}/accept", post(handlers::accept_appointment))
        .route("/{appointment_id}/reject", post(handlers::reject_appointment))
        .route("/{appointment_id}/reschedule-request", post(handlers::request_reschedule))
        .route("/{appointment_id}/reschedule-request/resolve", post(handlers::resolve_reschedule))
        .route("/{appointment_id}/modification-window", get(handlers::get_modification_window))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
