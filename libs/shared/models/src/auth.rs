use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// Authenticated caller as decoded from the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Resolve the caller into an actor of the appointment core.
    ///
    /// Only patients and providers take part in appointment flows; any other
    /// role, or a subject that is not a UUID, is rejected.
    pub fn actor(&self) -> Result<Actor, AppError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|_| AppError::Forbidden("Token subject is not a valid actor id".to_string()))?;
        let role = self
            .role
            .as_deref()
            .ok_or_else(|| AppError::Forbidden("Token carries no role".to_string()))?
            .parse::<ActorRole>()
            .map_err(AppError::Forbidden)?;
        Ok(Actor { id, role })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Patient,
    #[serde(alias = "doctor")]
    Provider,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRole::Patient => write!(f, "patient"),
            ActorRole::Provider => write!(f, "provider"),
        }
    }
}

impl FromStr for ActorRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "patient" => Ok(ActorRole::Patient),
            "provider" | "doctor" => Ok(ActorRole::Provider),
            other => Err(format!("Role '{}' cannot act on appointments", other)),
        }
    }
}

/// The `{actorId, role}` pair every core operation is invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn patient(id: Uuid) -> Self {
        Self { id, role: ActorRole::Patient }
    }

    pub fn provider(id: Uuid) -> Self {
        Self { id, role: ActorRole::Provider }
    }
}
