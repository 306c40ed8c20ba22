use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{
    AppointmentState, AppointmentStateMachine, AppointmentStore, InMemoryAppointmentStore, NoopDirectory,
    ParticipantDirectory, SupabaseAppointmentStore, SupabaseDirectory, SystemClock,
};
use notification_cell::{
    EventBus, InMemoryNotificationStore, NotificationDispatcher, NotificationState, NotificationStore,
    RealtimePublisher, RedisRelay, SupabaseNotificationStore,
};
use shared_config::{AppConfig, StorageBackend};
use shared_database::SupabaseClient;

struct Storage {
    appointments: Arc<dyn AppointmentStore>,
    notifications: Arc<dyn NotificationStore>,
    directory: Arc<dyn ParticipantDirectory>,
}

fn build_storage(config: &AppConfig) -> anyhow::Result<Storage> {
    match config.storage_backend {
        StorageBackend::Supabase => {
            let supabase = Arc::new(SupabaseClient::new(config).context("invalid Supabase configuration")?);
            info!("Using Supabase storage at {}", supabase.get_base_url());
            Ok(Storage {
                appointments: Arc::new(SupabaseAppointmentStore::new(supabase.clone())),
                notifications: Arc::new(SupabaseNotificationStore::new(supabase.clone())),
                directory: Arc::new(SupabaseDirectory::new(supabase)),
            })
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on restart");
            Ok(Storage {
                appointments: Arc::new(InMemoryAppointmentStore::new()),
                notifications: Arc::new(InMemoryNotificationStore::new()),
                directory: Arc::new(NoopDirectory),
            })
        }
    }
}

async fn build_publisher(config: &AppConfig, bus: &EventBus) -> Arc<dyn RealtimePublisher> {
    if !config.is_relay_configured() {
        info!("Realtime delivery is local to this process");
        return Arc::new(bus.clone());
    }

    match RedisRelay::connect(config, bus.clone()).await {
        Ok(relay) => {
            let relay = Arc::new(relay);
            relay.spawn_subscriber();
            relay as Arc<dyn RealtimePublisher>
        }
        Err(e) => {
            warn!("Realtime relay unavailable, falling back to local delivery: {}", e);
            Arc::new(bus.clone())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic appointment API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());
    let storage = build_storage(&config)?;

    // Realtime fan-out and notification dispatch
    let bus = EventBus::new(config.realtime_buffer);
    let publisher = build_publisher(&config, &bus).await;
    let dispatcher = NotificationDispatcher::new(storage.notifications.clone(), publisher);

    let machine = AppointmentStateMachine::new(storage.appointments, Arc::new(SystemClock), dispatcher)
        .with_directory(storage.directory);

    let appointments = AppointmentState {
        machine: Arc::new(machine),
        config: config.clone(),
    };
    let notifications = NotificationState {
        store: storage.notifications,
        bus,
        config: config.clone(),
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(appointments, notifications)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
