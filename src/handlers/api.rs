use axum::{
    extract::{Json as ExtractJson, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::RemoteStore;
use crate::models::common::{ErrorBody, CLIENT_ID_HEADER};
use crate::models::registration::{RegistrationInput, RegistrationRecord, StoredRecord};
use crate::services::clock::Clock;
use crate::services::form::{FormSettings, FormSnapshot, RegistrationForm, SubmitOutcome};
use crate::services::rate_limiter::{purge_expired, RateLimitConfig, RateLimiter};
use crate::services::storage::{KeyValueStore, StorageError};
use crate::services::submission::{FailureKind, BUSY_MESSAGE, INVALID_FORM_MESSAGE, SUCCESS_MESSAGE};
use crate::services::validation::{validate_form_data_at, Field};

// Sessions with nothing in flight are dropped once the map grows past this
pub const MAX_SESSIONS: usize = 10_000;
const MAX_CLIENT_ID_LEN: usize = 64;

// AppState struct containing shared resources
pub struct AppState {
    pub store: Arc<dyn RemoteStore>,
    pub limits: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub rate_limit: RateLimitConfig,
    pub settings: FormSettings,
    sessions: Mutex<HashMap<String, Arc<RegistrationForm>>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        limits: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        rate_limit: RateLimitConfig,
        settings: FormSettings,
    ) -> Self {
        Self {
            store,
            limits,
            clock,
            rate_limit,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn rate_limiter_for(&self, client_id: &str) -> RateLimiter {
        RateLimiter::new(
            Arc::clone(&self.limits),
            Arc::clone(&self.clock),
            self.rate_limit.scoped(client_id),
        )
    }

    // A form that is not registered as a session
    fn detached_form(&self, client_id: &str) -> RegistrationForm {
        RegistrationForm::new(
            self.rate_limiter_for(client_id),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.settings.clone(),
        )
    }

    /// The form belonging to a client, created on first use.
    pub fn form_for(&self, client_id: &str) -> Arc<RegistrationForm> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(form) = sessions.get(client_id) {
            return Arc::clone(form);
        }

        if sessions.len() >= MAX_SESSIONS {
            let before = sessions.len();
            sessions.retain(|_, form| form.is_in_flight());
            info!("Pruned {} form sessions", before - sessions.len());
        }

        let form = Arc::new(self.detached_form(client_id));
        sessions.insert(client_id.to_string(), Arc::clone(&form));
        form
    }

    /// The form a client already has, if any.
    pub fn session(&self, client_id: &str) -> Option<Arc<RegistrationForm>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(client_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Remove rate limit windows that have elapsed for every client.
    pub fn purge_expired_limits(&self) -> Result<usize, StorageError> {
        let prefix = format!("{}:", self.rate_limit.storage_key);
        purge_expired(self.limits.as_ref(), &prefix, self.clock.now())
    }
}

/// Client id from the request headers, restricted to a safe storage-key charset.
pub fn client_id(headers: &HeaderMap) -> Option<String> {
    let id: String = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_CLIENT_ID_LEN)
        .collect();

    (!id.is_empty()).then_some(id)
}

// Fresh, unguessable id for a client that did not send one
fn issue_client_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn missing_client_id() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new(
            "missing_client_id",
            "Identifiant client manquant. / Missing client id.",
        )),
    )
}

#[derive(Debug, Serialize)]
pub struct RegisteredResponse {
    pub message: String,
    pub registration: StoredRecord,
}

#[derive(Debug, Serialize)]
pub struct ValidationErrorResponse {
    pub error: String,
    pub message: String,
    pub errors: BTreeMap<Field, String>,
    pub focus: Option<Field>,
}

#[derive(Debug, Serialize)]
pub struct RateLimitedResponse {
    pub error: String,
    pub message: String,
    pub retry_after_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ValidationPreview {
    pub is_valid: bool,
    pub errors: BTreeMap<Field, String>,
    pub focus: Option<Field>,
    pub sanitized: RegistrationRecord,
}

fn failure_status(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::DuplicateEmail => StatusCode::CONFLICT,
        FailureKind::InvalidData => StatusCode::BAD_REQUEST,
        FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::Network | FailureKind::Transport => StatusCode::BAD_GATEWAY,
    }
}

fn outcome_response(outcome: SubmitOutcome) -> Response {
    match outcome {
        SubmitOutcome::Registered(stored) => (
            StatusCode::CREATED,
            Json(RegisteredResponse {
                message: SUCCESS_MESSAGE.to_string(),
                registration: stored,
            }),
        )
            .into_response(),
        SubmitOutcome::Invalid { errors, focus } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ValidationErrorResponse {
                error: "validation_failed".to_string(),
                message: INVALID_FORM_MESSAGE.to_string(),
                errors,
                focus,
            }),
        )
            .into_response(),
        SubmitOutcome::RateLimited {
            retry_after,
            message,
        } => {
            let seconds = retry_after.as_millis().div_ceil(1000).max(1);
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(RateLimitedResponse {
                    error: "rate_limited".to_string(),
                    message,
                    retry_after_ms: retry_after.as_millis() as u64,
                }),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
        SubmitOutcome::Busy => (
            StatusCode::CONFLICT,
            Json(ErrorBody::new("submission_in_progress", BUSY_MESSAGE)),
        )
            .into_response(),
        SubmitOutcome::Failed { kind, message } => (
            failure_status(kind),
            Json(ErrorBody::new(kind.as_str(), message)),
        )
            .into_response(),
    }
}

// Registration submission endpoint
pub async fn submit_registration(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ExtractJson(input): ExtractJson<RegistrationInput>,
) -> Response {
    let client = client_id(&headers).unwrap_or_else(|| {
        let issued = issue_client_id();
        debug!("Issued client id {}", issued);
        issued
    });
    info!("Received registration submission from client {}", client);

    let form = state.form_for(&client);

    // Run on its own task so a dropped connection cannot strand the form mid-submit
    let outcome = match tokio::spawn(async move { form.submit(input).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Submission task failed: {}", e);
            let kind = FailureKind::Transport;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new(kind.as_str(), kind.user_message())),
            )
                .into_response();
        }
    };

    match &outcome {
        SubmitOutcome::Registered(stored) => info!("Client {} registered as {}", client, stored.id),
        SubmitOutcome::Failed { kind, .. } => warn!("Client {} submission failed: {:?}", client, kind),
        _ => {}
    }

    // The site sends this id back to reach the same form
    let mut response = outcome_response(outcome);
    if let Ok(value) = HeaderValue::from_str(&client) {
        response.headers_mut().insert(CLIENT_ID_HEADER, value);
    }
    response
}

// Current form status for a client
pub async fn registration_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<FormSnapshot> {
    let snapshot = match client_id(&headers) {
        Some(client) => match state.session(&client) {
            Some(form) => form.snapshot(),
            // No session to read from; the rate limit window may still apply
            None => state.detached_form(&client).snapshot(),
        },
        None => FormSnapshot::blank(state.rate_limit.max_attempts),
    };

    Json(snapshot)
}

// Dry-run validation, development only
pub async fn validate_registration(
    State(state): State<Arc<AppState>>,
    ExtractJson(input): ExtractJson<RegistrationInput>,
) -> Json<ValidationPreview> {
    let result = validate_form_data_at(&input, state.clock.now().date_naive());

    Json(ValidationPreview {
        is_valid: result.is_valid,
        focus: result.first_invalid_field(),
        errors: result.errors,
        sanitized: result.sanitized,
    })
}

// Explicit rate limit reset, development only
pub async fn reset_rate_limit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let client = client_id(&headers).ok_or_else(missing_client_id)?;

    match state.rate_limiter_for(&client).reset() {
        Ok(()) => {
            info!("Rate limit cleared for client {}", client);
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => {
            error!("Failed to clear rate limit for client {}: {}", client, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new("storage", e.to_string())),
            ))
        }
    }
}
