use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::event_bus::EventBus;
use crate::services::store::NotificationStore;

#[derive(Clone)]
pub struct NotificationState {
    pub store: Arc<dyn NotificationStore>,
    pub bus: EventBus,
    pub config: Arc<AppConfig>,
}

pub fn notification_routes(state: NotificationState) -> Router {
    let protected_routes = Router::new()
        .route("/", get(handlers::list_notifications))
        .route("/unread-count", get(handlers::unread_count))
        .route("/read-all", post(handlers::mark_all_read))
        .route("/{notification_id}/read", post(handlers::mark_read))
        .route("/{notification_id}", delete(handlers::delete_notification))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    // The socket authenticates from its query string.
    let realtime_routes = Router::new().route("/ws", get(handlers::ws_upgrade));

    Router::new()
        .merge(protected_routes)
        .merge(realtime_routes)
        .with_state(state)
}
