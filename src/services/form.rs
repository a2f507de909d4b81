use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::client::{RemoteError, RemoteStore};
use crate::models::registration::{RegistrationInput, StoredRecord};
use crate::services::clock::Clock;
use crate::services::rate_limiter::{format_time_until_reset, RateLimiter};
use crate::services::storage::StorageError;
use crate::services::submission::{
    rate_limited_message, FailureKind, SubmissionEvent, SubmissionMachine, SubmissionStatus,
    TransitionError,
};
use crate::services::validation::{
    email_fingerprint, validate_form_data_at, Field, FormValidationResult,
};

pub const DEFAULT_SUCCESS_RESET_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct FormSettings {
    /// How long the confirmation stays up before the form clears itself
    pub success_reset_delay: Duration,
    /// Log raw backend error detail (development only, off unless asked for)
    pub log_remote_detail: bool,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            success_reset_delay: DEFAULT_SUCCESS_RESET_DELAY,
            log_remote_detail: false,
        }
    }
}

/// What a submit call ended with, for the presentation layer.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Another submission from this form is still in flight
    Busy,
    RateLimited {
        retry_after: Duration,
        message: String,
    },
    Invalid {
        errors: BTreeMap<Field, String>,
        focus: Option<Field>,
    },
    Registered(StoredRecord),
    Failed {
        kind: FailureKind,
        message: String,
    },
}

/// Everything the presentation layer needs to render the form.
#[derive(Debug, Clone, Serialize)]
pub struct FormSnapshot {
    pub status: SubmissionStatus,
    pub fields: RegistrationInput,
    pub errors: BTreeMap<Field, String>,
    pub focus: Option<Field>,
    pub notice: Option<String>,
    pub remaining_attempts: u32,
    pub is_blocked: bool,
    pub retry_after_ms: u64,
    pub countdown: Option<String>,
}

impl FormSnapshot {
    /// What an untouched form looks like.
    pub fn blank(max_attempts: u32) -> Self {
        Self {
            status: SubmissionStatus::Idle,
            fields: RegistrationInput::default(),
            errors: BTreeMap::new(),
            focus: None,
            notice: None,
            remaining_attempts: max_attempts,
            is_blocked: false,
            retry_after_ms: 0,
            countdown: None,
        }
    }
}

/// One registration form: state machine, rate limiter and remote store.
pub struct RegistrationForm {
    machine: Mutex<SubmissionMachine>,
    rate_limiter: RateLimiter,
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    settings: FormSettings,
}

// Await a store call, turning a panic into an ordinary remote failure. Callers
// pass an async block so a panic raised while building the call is caught too.
async fn guarded<T, F>(call: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Unknown("remote store call panicked".to_string())),
    }
}

impl RegistrationForm {
    pub fn new(
        rate_limiter: RateLimiter,
        store: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        settings: FormSettings,
    ) -> Self {
        Self {
            machine: Mutex::new(SubmissionMachine::new()),
            rate_limiter,
            store,
            clock,
            settings,
        }
    }

    fn machine(&self) -> MutexGuard<'_, SubmissionMachine> {
        // The machine holds no invariant a panic elsewhere could break
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, event: SubmissionEvent) -> Result<(), TransitionError> {
        self.machine().handle(event).inspect_err(|e| {
            error!("Unexpected form transition: {}", e);
        })
    }

    pub fn status(&self) -> SubmissionStatus {
        self.machine().status()
    }

    /// A submission currently owns this form.
    pub fn is_in_flight(&self) -> bool {
        self.machine().is_in_flight()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    fn log_remote_failure(&self, stage: &str, error: &RemoteError) {
        if self.settings.log_remote_detail {
            warn!("Remote store failure during {}: {}", stage, error);
        } else {
            warn!(
                "Remote store failure during {}: {:?}",
                stage,
                FailureKind::from_remote(error)
            );
        }
    }

    /// Validate without touching state, the rate limiter or the store.
    pub fn preview(&self, input: &RegistrationInput) -> FormValidationResult {
        validate_form_data_at(input, self.clock.now().date_naive())
    }

    /// Run one submission through the whole pipeline.
    ///
    /// The rate limit gate runs before validation, so a blocked client gets
    /// the retry notice without any field feedback. The duplicate check and the
    /// insert are awaited one after the other.
    pub async fn submit(self: &Arc<Self>, input: RegistrationInput) -> SubmitOutcome {
        // Claims the form; later requests are busy until this one resolves
        if self
            .machine()
            .handle(SubmissionEvent::SubmitRequested(input.clone()))
            .is_err()
        {
            debug!("Submission rejected, form is busy");
            return SubmitOutcome::Busy;
        }

        let limit = self.rate_limiter.current_state();
        if limit.is_blocked {
            let retry_after = self.rate_limiter.time_until_reset();
            info!(
                "Submission blocked by rate limit, retry in {}",
                format_time_until_reset(retry_after)
            );
            if self
                .transition(SubmissionEvent::RateLimited { retry_after })
                .is_err()
            {
                return self.abandoned();
            }
            return SubmitOutcome::RateLimited {
                retry_after,
                message: rate_limited_message(retry_after),
            };
        }

        let validation = self.preview(&input);
        if !validation.is_valid {
            let focus = validation.first_invalid_field();
            debug!(
                "Submission has {} invalid fields, first {:?}",
                validation.errors.len(),
                focus
            );
            if self
                .transition(SubmissionEvent::ValidationFailed(validation.errors.clone()))
                .is_err()
            {
                return self.abandoned();
            }
            return SubmitOutcome::Invalid {
                errors: validation.errors,
                focus,
            };
        }

        if self.transition(SubmissionEvent::ValidationPassed).is_err() {
            return self.abandoned();
        }

        // Counts whatever the outcome, duplicates included
        match self.rate_limiter.record_attempt() {
            Ok(state) => {
                if self.transition(SubmissionEvent::AttemptRecorded(state)).is_err() {
                    return self.abandoned();
                }
            }
            Err(e) => warn!("Failed to record submission attempt: {}", e),
        }

        let record = validation.sanitized;
        let fingerprint = email_fingerprint(&record.email);

        let exists = guarded(async { self.store.email_exists(&record.email).await }).await;
        if self
            .transition(SubmissionEvent::DuplicateCheckResolved(exists.clone()))
            .is_err()
        {
            return self.abandoned();
        }
        match exists {
            Ok(true) => {
                info!("Registration {} already exists", fingerprint);
                return self.failed(FailureKind::DuplicateEmail);
            }
            Ok(false) => {}
            Err(e) => {
                self.log_remote_failure("duplicate check", &e);
                return self.failed(FailureKind::Transport);
            }
        }

        let inserted = guarded(async { self.store.insert(&record).await }).await;
        if self
            .transition(SubmissionEvent::InsertResolved(inserted.clone()))
            .is_err()
        {
            return self.abandoned();
        }
        match inserted {
            Ok(stored) => {
                info!("Registration {} stored with ID {}", fingerprint, stored.id);
                if let Err(e) = self.rate_limiter.reset() {
                    warn!("Failed to clear rate limit after success: {}", e);
                }
                self.schedule_success_reset();
                SubmitOutcome::Registered(stored)
            }
            Err(e) => {
                self.log_remote_failure("insert", &e);
                self.failed(FailureKind::from_remote(&e))
            }
        }
    }

    // The machine refused a step of this pipeline; go no further
    fn abandoned(&self) -> SubmitOutcome {
        self.failed(FailureKind::Transport)
    }

    fn failed(&self, kind: FailureKind) -> SubmitOutcome {
        SubmitOutcome::Failed {
            kind,
            message: kind.user_message().to_string(),
        }
    }

    // Return to Idle with cleared fields once the confirmation has been shown
    fn schedule_success_reset(self: &Arc<Self>) {
        let attempt = self.machine().attempt();
        let delay = self.settings.success_reset_delay;
        let form = Arc::clone(self);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if form
                .transition(SubmissionEvent::SuccessTimerElapsed { attempt })
                .is_ok()
            {
                debug!("Form reset after successful attempt {}", attempt);
            }
        });
    }

    /// Explicit limiter reset, outside the success path.
    pub fn reset_rate_limit(&self) -> Result<(), StorageError> {
        self.rate_limiter.reset()
    }

    pub fn snapshot(&self) -> FormSnapshot {
        let limit = self.rate_limiter.current_state();
        let retry_after = if limit.is_blocked {
            self.rate_limiter.time_until_reset()
        } else {
            Duration::ZERO
        };

        let machine = self.machine();
        FormSnapshot {
            status: machine.status(),
            fields: machine.fields().clone(),
            errors: machine.errors().clone(),
            focus: machine.focus(),
            notice: machine.notice().map(str::to_string),
            remaining_attempts: limit.remaining_attempts,
            is_blocked: limit.is_blocked,
            retry_after_ms: retry_after.as_millis() as u64,
            countdown: limit
                .is_blocked
                .then(|| format_time_until_reset(retry_after)),
        }
    }
}
