use std::env;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_REALTIME_CHANNEL: &str = "clinic:realtime";
const DEFAULT_REALTIME_BUFFER: usize = 64;

/// Where appointment and notification rows are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Supabase,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub supabase_jwt_secret: String,
    pub storage_backend: StorageBackend,
    pub redis_url: Option<String>,
    pub realtime_channel: String,
    pub realtime_buffer: usize,
    pub bind_addr: SocketAddr,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let supabase_url = env::var("SUPABASE_URL").unwrap_or_else(|_| {
            warn!("SUPABASE_URL not set, using empty value");
            String::new()
        });
        let supabase_service_key = env::var("SUPABASE_SERVICE_KEY").unwrap_or_else(|_| {
            warn!("SUPABASE_SERVICE_KEY not set, using empty value");
            String::new()
        });
        let supabase_jwt_secret = env::var("SUPABASE_JWT_SECRET").unwrap_or_else(|_| {
            warn!("SUPABASE_JWT_SECRET not set, using empty value");
            String::new()
        });
        let supabase_ready = !supabase_url.is_empty() && !supabase_service_key.is_empty();

        let storage_backend = match env::var("STORAGE_BACKEND").ok().as_deref() {
            Some("memory") => StorageBackend::Memory,
            Some("supabase") => StorageBackend::Supabase,
            Some(other) => {
                warn!("Unknown STORAGE_BACKEND '{}', choosing from Supabase settings", other);
                Self::default_backend(supabase_ready)
            }
            None => Self::default_backend(supabase_ready),
        };

        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.is_empty());

        let realtime_channel = env::var("REALTIME_CHANNEL")
            .unwrap_or_else(|_| DEFAULT_REALTIME_CHANNEL.to_string());

        let realtime_buffer = match env::var("REALTIME_BUFFER") {
            Ok(raw) => raw.parse::<usize>().ok().filter(|n| *n > 0).unwrap_or_else(|| {
                warn!("REALTIME_BUFFER '{}' is not a positive integer, using {}", raw, DEFAULT_REALTIME_BUFFER);
                DEFAULT_REALTIME_BUFFER
            }),
            Err(_) => DEFAULT_REALTIME_BUFFER,
        };

        let bind_addr = Self::parse_bind_addr(env::var("BIND_ADDR").ok());

        let config = Self {
            supabase_url,
            supabase_service_key,
            supabase_jwt_secret,
            storage_backend,
            redis_url,
            realtime_channel,
            realtime_buffer,
            bind_addr,
        };

        if config.supabase_jwt_secret.is_empty() {
            warn!("Token validation will reject every request until SUPABASE_JWT_SECRET is set");
        }
        if config.storage_backend == StorageBackend::Supabase && !config.is_supabase_configured() {
            warn!("STORAGE_BACKEND=supabase but Supabase URL or service key is missing");
        }

        config
    }

    /// Configuration for tests and local runs: in-memory storage, no relay.
    pub fn local(jwt_secret: impl Into<String>) -> Self {
        Self {
            supabase_url: String::new(),
            supabase_service_key: String::new(),
            supabase_jwt_secret: jwt_secret.into(),
            storage_backend: StorageBackend::Memory,
            redis_url: None,
            realtime_channel: DEFAULT_REALTIME_CHANNEL.to_string(),
            realtime_buffer: DEFAULT_REALTIME_BUFFER,
            bind_addr: DEFAULT_BIND_ADDR.parse().unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 3000))),
        }
    }

    pub fn is_supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_service_key.is_empty()
    }

    pub fn is_relay_configured(&self) -> bool {
        self.redis_url.is_some()
    }

    fn default_backend(supabase_ready: bool) -> StorageBackend {
        if supabase_ready {
            StorageBackend::Supabase
        } else {
            warn!("Supabase not configured, falling back to in-memory storage (not durable)");
            StorageBackend::Memory
        }
    }

    fn parse_bind_addr(raw: Option<String>) -> SocketAddr {
        let fallback = SocketAddr::from(([0, 0, 0, 0], 3000));
        match raw {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!("BIND_ADDR '{}' is invalid, using {}", value, DEFAULT_BIND_ADDR);
                fallback
            }),
            None => fallback,
        }
    }
}
