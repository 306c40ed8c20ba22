use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    Extension, Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_models::auth::{Actor, User};
use shared_models::error::AppError;
use shared_utils::jwt::validate_token;

use crate::models::{InboxQuery, RealtimeEnvelope};
use crate::router::NotificationState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ==============================================================================
// INBOX HANDLERS
// ==============================================================================

pub async fn list_notifications(
    State(state): State<NotificationState>,
    Extension(user): Extension<User>,
    Query(query): Query<InboxQuery>,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let notifications = state.store.list(actor.id, query).await?;

    Ok(Json(json!({
        "notifications": notifications,
        "total": notifications.len(),
    })))
}

pub async fn unread_count(
    State(state): State<NotificationState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let count = state.store.unread_count(actor.id).await?;
    Ok(Json(json!({ "unread_count": count })))
}

pub async fn mark_read(
    State(state): State<NotificationState>,
    Extension(user): Extension<User>,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let notification = state.store.mark_read(actor.id, notification_id).await?;
    Ok(Json(json!({ "notification": notification })))
}

pub async fn mark_all_read(
    State(state): State<NotificationState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = user.actor()?;
    let updated = state.store.mark_all_read(actor.id).await?;
    Ok(Json(json!({ "updated": updated })))
}

pub async fn delete_notification(
    State(state): State<NotificationState>,
    Extension(user): Extension<User>,
    Path(notification_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let actor = user.actor()?;
    state.store.delete(actor.id, notification_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ==============================================================================
// REALTIME CHANNEL
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token
/// travels in the query string.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<NotificationState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, AppError> {
    let user = validate_token(&query.token, &state.config.supabase_jwt_secret)
        .map_err(|e| AppError::Auth(e.to_string()))?;
    let actor = user.actor()?;

    info!(actor_id = %actor.id, role = %actor.role, "Realtime connection accepted");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, actor)))
}

async fn handle_socket(socket: WebSocket, state: NotificationState, actor: Actor) {
    let (mut sink, mut stream) = socket.split();
    let mut subscription = state.bus.join(actor);

    let unread = match state.store.unread_count(actor.id).await {
        Ok(count) => count,
        Err(e) => {
            warn!("Failed to load unread count for {}: {}", actor.id, e);
            0
        }
    };
    if let Ok(text) = RealtimeEnvelope::connected(&actor, unread).to_message() {
        if sink.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let Some(frame) = frame else {
                    debug!("Connection for {} superseded", actor.id);
                    break;
                };
                if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Realtime socket error for {}: {}", actor.id, e);
                        break;
                    }
                    // Client frames carry nothing; pongs are handled by axum.
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(subscription);
    info!(actor_id = %actor.id, "Realtime connection closed");
}
