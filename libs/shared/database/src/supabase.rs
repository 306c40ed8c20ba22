use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

/// PostgREST error code for a unique-constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A unique or exclusion constraint rejected the write.
    #[error("Constraint violation: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Authentication error: {0}")]
    Unauthorized(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid client configuration: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Thin PostgREST client authenticated with the service key.
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    headers: HeaderMap,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Result<Self, DatabaseError> {
        Self::with_credentials(&config.supabase_url, &config.supabase_service_key)
    }

    pub fn with_credentials(base_url: &str, service_key: &str) -> Result<Self, DatabaseError> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(service_key)
            .map_err(|_| DatabaseError::Configuration("service key is not a valid header value".to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", service_key))
            .map_err(|_| DatabaseError::Configuration("service key is not a valid header value".to_string()))?;
        headers.insert("apikey", api_key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    /// Issue a request and decode the JSON body.
    ///
    /// `prefer` is forwarded as the PostgREST `Prefer` header, e.g.
    /// `return=representation` to get written rows back.
    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        prefer: Option<&'static str>,
    ) -> Result<T, DatabaseError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut req = self.client.request(method, &url).headers(self.headers.clone());
        if let Some(prefer) = prefer {
            req = req.header("Prefer", prefer);
        }
        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            error!("API error ({}): {}", status, text);
            return Err(Self::classify(status, text));
        }

        // DELETE/PATCH with `return=minimal` answer with an empty body.
        let text = if text.trim().is_empty() { "null".to_string() } else { text };
        Ok(serde_json::from_str(&text)?)
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(status: StatusCode, text: String) -> DatabaseError {
        let code = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| body.get("code").and_then(Value::as_str).map(str::to_string));

        match status {
            StatusCode::CONFLICT => DatabaseError::Conflict(text),
            _ if code.as_deref() == Some(UNIQUE_VIOLATION) => DatabaseError::Conflict(text),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DatabaseError::Unauthorized(text),
            StatusCode::NOT_FOUND => DatabaseError::NotFound(text),
            _ => DatabaseError::Api {
                status: status.as_u16(),
                message: text,
            },
        }
    }
}
