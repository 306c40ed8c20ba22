use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use shared_database::SupabaseClient;
use shared_models::auth::{Actor, ActorRole};

/// Resolves participant ids to names for notification text.
#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    /// `None` when the participant is unknown or the lookup failed.
    async fn display_name(&self, actor: Actor) -> Option<String>;
}

/// Directory that knows nobody; notices fall back to generic wording.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDirectory;

#[async_trait]
impl ParticipantDirectory for NoopDirectory {
    async fn display_name(&self, _actor: Actor) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct NameRow {
    first_name: Option<String>,
    last_name: Option<String>,
}

impl NameRow {
    fn full_name(self) -> Option<String> {
        let name = [self.first_name, self.last_name]
            .into_iter()
            .flatten()
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!name.is_empty()).then_some(name)
    }
}

/// Looks names up in the `patients` and `doctors` tables.
pub struct SupabaseDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl ParticipantDirectory for SupabaseDirectory {
    async fn display_name(&self, actor: Actor) -> Option<String> {
        let table = match actor.role {
            ActorRole::Patient => "patients",
            ActorRole::Provider => "doctors",
        };
        let path = format!("/rest/v1/{}?id=eq.{}&select=first_name,last_name", table, actor.id);

        match self.supabase.request::<Vec<NameRow>>(Method::GET, &path, None, None).await {
            Ok(rows) => {
                let name = rows.into_iter().next().and_then(NameRow::full_name)?;
                Some(match actor.role {
                    ActorRole::Provider => format!("Dr. {}", name),
                    ActorRole::Patient => name,
                })
            }
            Err(e) => {
                debug!("Name lookup for {} {} failed: {}", actor.role, actor.id, e);
                None
            }
        }
    }
}
