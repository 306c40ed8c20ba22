use axum::{routing::get, Router};

use appointment_cell::{appointment_routes, AppointmentState};
use notification_cell::{notification_routes, NotificationState};

pub fn create_router(appointments: AppointmentState, notifications: NotificationState) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic appointment API is running!" }))
        .nest("/appointments", appointment_routes(appointments))
        .nest("/notifications", notification_routes(notifications))
}
