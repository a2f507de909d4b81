//! Submission state machine.
//!
//! - `Idle` --ValidationPassed--> `Submitting`
//! - `Submitting` --InsertResolved(Ok)--> `Success`
//! - `Submitting` --DuplicateCheckResolved(true | Err) / InsertResolved(Err)--> `Failed`
//! - `Success` --SuccessTimerElapsed--> `Idle` (fields cleared)
//! - `Failed` --SubmitRequested--> `Idle` (fields kept)
//!
//! An accepted `SubmitRequested` holds the form until `RateLimited`,
//! `ValidationFailed` or `ValidationPassed` arrives; a second request in that
//! gap is refused as busy. `RateLimited` and `ValidationFailed` leave the
//! machine in `Idle`. The machine does no I/O; `RegistrationForm` drives it.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::client::RemoteError;
use crate::models::registration::{RegistrationInput, StoredRecord};
use crate::services::rate_limiter::{countdown_parts, RateLimitState};
use crate::services::validation::Field;

pub const SUCCESS_MESSAGE: &str =
    "Inscription enregistrée ! Merci. / Registration received! Thank you.";
pub const INVALID_FORM_MESSAGE: &str =
    "Veuillez corriger les erreurs du formulaire. / Please correct the errors in the form.";
pub const BUSY_MESSAGE: &str =
    "Envoi en cours, veuillez patienter. / Submission in progress, please wait.";

pub fn rate_limited_message(retry_after: Duration) -> String {
    let (fr, en) = countdown_parts(retry_after);
    format!(
        "Trop de tentatives. Veuillez réessayer dans {}. / Too many attempts. Please retry in {}.",
        fr, en
    )
}

/// Why a submission ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DuplicateEmail,
    InvalidData,
    Timeout,
    Network,
    Transport,
}

impl FailureKind {
    pub fn from_remote(error: &RemoteError) -> Self {
        match error {
            RemoteError::Duplicate(_) => FailureKind::DuplicateEmail,
            RemoteError::InvalidData(_) => FailureKind::InvalidData,
            RemoteError::Timeout => FailureKind::Timeout,
            RemoteError::Network(_) => FailureKind::Network,
            RemoteError::Unknown(_) => FailureKind::Transport,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::DuplicateEmail => "duplicate_email",
            FailureKind::InvalidData => "invalid_data",
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::Transport => "transport",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::DuplicateEmail => {
                "Cette adresse email est déjà enregistrée. / This email is already registered."
            }
            FailureKind::InvalidData => {
                "Certaines informations ont été refusées. Vérifiez le formulaire. / Some information was rejected. Please check the form."
            }
            FailureKind::Timeout => {
                "Le serveur met trop de temps à répondre. Veuillez réessayer. / The server took too long to respond. Please try again."
            }
            FailureKind::Network => {
                "Problème de connexion. Veuillez réessayer. / Connection problem. Please try again."
            }
            FailureKind::Transport => {
                "Une erreur est survenue. Veuillez réessayer. / An error occurred. Please try again."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SubmissionStatus {
    Idle,
    Submitting,
    Success,
    Failed(FailureKind),
}

#[derive(Debug, Clone)]
pub enum SubmissionEvent {
    SubmitRequested(RegistrationInput),
    RateLimited { retry_after: Duration },
    ValidationFailed(BTreeMap<Field, String>),
    ValidationPassed,
    AttemptRecorded(RateLimitState),
    DuplicateCheckResolved(Result<bool, RemoteError>),
    InsertResolved(Result<StoredRecord, RemoteError>),
    SuccessTimerElapsed { attempt: u64 },
}

impl SubmissionEvent {
    fn name(&self) -> &'static str {
        match self {
            SubmissionEvent::SubmitRequested(_) => "SubmitRequested",
            SubmissionEvent::RateLimited { .. } => "RateLimited",
            SubmissionEvent::ValidationFailed(_) => "ValidationFailed",
            SubmissionEvent::ValidationPassed => "ValidationPassed",
            SubmissionEvent::AttemptRecorded(_) => "AttemptRecorded",
            SubmissionEvent::DuplicateCheckResolved(_) => "DuplicateCheckResolved",
            SubmissionEvent::InsertResolved(_) => "InsertResolved",
            SubmissionEvent::SuccessTimerElapsed { .. } => "SuccessTimerElapsed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("a submission is already in progress")]
    Busy,
    #[error("{event} is not valid in state {state:?}")]
    Invalid {
        event: &'static str,
        state: SubmissionStatus,
    },
}

/// Form state owned by one client session.
#[derive(Debug, Clone)]
pub struct SubmissionMachine {
    status: SubmissionStatus,
    fields: RegistrationInput,
    errors: BTreeMap<Field, String>,
    focus: Option<Field>,
    notice: Option<String>,
    attempt: u64,
    // Request accepted, rate limit and validation not yet resolved
    pending: bool,
    rate_limit: Option<RateLimitState>,
}

impl Default for SubmissionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionMachine {
    pub fn new() -> Self {
        Self {
            status: SubmissionStatus::Idle,
            fields: RegistrationInput::default(),
            errors: BTreeMap::new(),
            focus: None,
            notice: None,
            attempt: 0,
            pending: false,
            rate_limit: None,
        }
    }

    pub fn status(&self) -> SubmissionStatus {
        self.status
    }

    /// Fields as last submitted; cleared after a success is acknowledged.
    pub fn fields(&self) -> &RegistrationInput {
        &self.fields
    }

    pub fn errors(&self) -> &BTreeMap<Field, String> {
        &self.errors
    }

    pub fn focus(&self) -> Option<Field> {
        self.focus
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Sequence number of the current attempt.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// True while a submission owns the form.
    pub fn is_in_flight(&self) -> bool {
        self.pending || self.status == SubmissionStatus::Submitting
    }

    pub fn last_rate_limit(&self) -> Option<RateLimitState> {
        self.rate_limit
    }

    fn invalid(&self, event: &SubmissionEvent) -> TransitionError {
        TransitionError::Invalid {
            event: event.name(),
            state: self.status,
        }
    }

    fn fail(&mut self, kind: FailureKind) {
        self.status = SubmissionStatus::Failed(kind);
        self.notice = Some(kind.user_message().to_string());
    }

    pub fn handle(&mut self, event: SubmissionEvent) -> Result<(), TransitionError> {
        use SubmissionEvent::*;
        use SubmissionStatus::*;

        match (self.status, event) {
            (Idle, SubmitRequested(_)) if self.pending => Err(TransitionError::Busy),
            // A failed attempt can be retried straight away
            (Idle | Failed(_), SubmitRequested(input)) => {
                self.status = Idle;
                self.pending = true;
                self.fields = input;
                self.errors.clear();
                self.focus = None;
                self.notice = None;
                self.attempt += 1;
                Ok(())
            }
            (Submitting | Success, SubmitRequested(_)) => Err(TransitionError::Busy),

            (Idle, RateLimited { retry_after }) if self.pending => {
                self.pending = false;
                self.notice = Some(rate_limited_message(retry_after));
                Ok(())
            }

            (Idle, ValidationFailed(errors)) if self.pending => {
                self.pending = false;
                self.focus = errors.keys().next().copied();
                self.errors = errors;
                self.notice = Some(INVALID_FORM_MESSAGE.to_string());
                Ok(())
            }

            (Idle, ValidationPassed) if self.pending => {
                self.pending = false;
                self.status = Submitting;
                Ok(())
            }

            (Submitting, AttemptRecorded(state)) => {
                self.rate_limit = Some(state);
                Ok(())
            }

            (Submitting, DuplicateCheckResolved(result)) => {
                match result {
                    Ok(false) => {}
                    Ok(true) => self.fail(FailureKind::DuplicateEmail),
                    // A failed check must not be read as "not registered"
                    Err(_) => self.fail(FailureKind::Transport),
                }
                Ok(())
            }

            (Submitting, InsertResolved(result)) => {
                match result {
                    Ok(_) => {
                        self.status = Success;
                        self.notice = Some(SUCCESS_MESSAGE.to_string());
                    }
                    Err(error) => self.fail(FailureKind::from_remote(&error)),
                }
                Ok(())
            }

            (Success, SuccessTimerElapsed { attempt }) if attempt == self.attempt => {
                self.status = Idle;
                self.fields = RegistrationInput::default();
                self.errors.clear();
                self.focus = None;
                self.notice = None;
                Ok(())
            }
            // Timer from an older attempt
            (_, SuccessTimerElapsed { .. }) => Ok(()),

            (_, event) => Err(self.invalid(&event)),
        }
    }
}
