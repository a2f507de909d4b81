use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::SupabaseAuth;
use crate::models::registration::{RegistrationRecord, StoredRecord};
use crate::services::validation::email_fingerprint;

/// Failures of the remote store, already classified.
///
/// The string payloads carry backend detail for development logs only. User
/// facing text is derived from the variant alone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("record already exists: {0}")]
    Duplicate(String),
    #[error("remote store rejected the data: {0}")]
    InvalidData(String),
    #[error("remote store timed out")]
    Timeout,
    #[error("network failure: {0}")]
    Network(String),
    #[error("unexpected remote failure: {0}")]
    Unknown(String),
}

// Error body returned by the REST gateway
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Classify a non-success HTTP response from the store.
pub fn map_status_error(status: StatusCode, body: &str) -> RemoteError {
    let parsed: PostgrestError = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.code.as_deref().unwrap_or("");
    let detail = format!(
        "{} {} {}",
        status.as_u16(),
        parsed.message.as_deref().unwrap_or(body),
        parsed.details.as_deref().unwrap_or("")
    )
    .trim()
    .to_string();

    // 23505: unique_violation
    if code == "23505" || (code.is_empty() && status == StatusCode::CONFLICT) {
        return RemoteError::Duplicate(detail);
    }

    // Class 22 (data exception) and the other class 23 constraint violations
    if code.starts_with("22")
        || code.starts_with("23")
        || code.starts_with("PGRST2")
        || status == StatusCode::BAD_REQUEST
        || status == StatusCode::UNPROCESSABLE_ENTITY
    {
        return RemoteError::InvalidData(detail);
    }

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RemoteError::Timeout,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => RemoteError::Network(detail),
        _ => RemoteError::Unknown(detail),
    }
}

/// Classify a transport-level failure (no usable HTTP response).
pub fn map_transport_error(err: &reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_connect() || err.is_request() {
        RemoteError::Network(err.to_string())
    } else if err.is_decode() || err.is_body() {
        RemoteError::Unknown(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}

/// Authoritative store of registrations.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Whether a registration with this (already lower-cased) email exists.
    async fn email_exists(&self, email: &str) -> Result<bool, RemoteError>;

    async fn insert(&self, record: &RegistrationRecord) -> Result<StoredRecord, RemoteError>;

    /// Reachability check used at start-up.
    async fn ping(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Client for the hosted database's REST interface
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    table: String,
    auth: SupabaseAuth,
}

impl SupabaseClient {
    pub fn new(
        base_url: &str,
        auth: SupabaseAuth,
        table: &str,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| map_transport_error(&e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            auth,
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    async fn error_from_response(response: reqwest::Response) -> RemoteError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        map_status_error(status, &body)
    }
}

#[async_trait]
impl RemoteStore for SupabaseClient {
    async fn email_exists(&self, email: &str) -> Result<bool, RemoteError> {
        let url = self.table_url();
        let filter = format!("eq.{}", email);

        debug!("Checking for existing registration {}", email_fingerprint(email));

        let response = self
            .auth
            .apply(self.client.get(&url))
            .query(&[("select", "id"), ("email", filter.as_str()), ("limit", "1")])
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| map_transport_error(&e))?;

        Ok(!rows.is_empty())
    }

    async fn insert(&self, record: &RegistrationRecord) -> Result<StoredRecord, RemoteError> {
        let url = self.table_url();

        info!(
            "Inserting registration {} into {}",
            email_fingerprint(&record.email),
            self.table
        );

        let response = self
            .auth
            .apply(self.client.post(&url))
            .header("Prefer", "return=representation")
            .header("Accept", "application/vnd.pgrst.object+json")
            .json(&[record])
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        info!("Insert response received with status: {}", response.status());

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json::<StoredRecord>()
            .await
            .map_err(|e| map_transport_error(&e))
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let response = self
            .auth
            .apply(self.client.get(self.table_url()))
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }
}
