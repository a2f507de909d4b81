//! Attempt-window rate limiter for registration submissions.
//!
//! The window is persisted through a `KeyValueStore` under a single key as
//! `{"attempts": n, "resetTime": epoch_ms}`, so it survives restarts. Expiry is
//! lazy: any read that finds an elapsed window drops it and reports a fresh
//! state. Concurrent writers are not coordinated; the last write wins.
//!
//! This throttling is advisory. Anyone who can pick a new client id or wipe
//! the store starts with a fresh quota.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::services::clock::Clock;
use crate::services::storage::{KeyValueStore, StorageError};

pub const DEFAULT_STORAGE_KEY: &str = "registration_rate_limit";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
    pub storage_key: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window: DEFAULT_WINDOW,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

impl RateLimitConfig {
    /// Same limits, stored under `<storage_key>:<suffix>`.
    pub fn scoped(&self, suffix: &str) -> Self {
        Self {
            storage_key: format!("{}:{}", self.storage_key, suffix),
            ..self.clone()
        }
    }
}

/// Snapshot of the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitState {
    pub attempt_count: u32,
    pub window_reset_at: Option<DateTime<Utc>>,
    pub is_blocked: bool,
    pub remaining_attempts: u32,
}

// On-disk shape of the window
#[derive(Debug, Serialize, Deserialize)]
struct PersistedWindow {
    attempts: u32,
    #[serde(rename = "resetTime")]
    reset_time: i64,
}

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn state_from(&self, window: Option<&PersistedWindow>) -> RateLimitState {
        match window {
            Some(window) => RateLimitState {
                attempt_count: window.attempts,
                window_reset_at: DateTime::from_timestamp_millis(window.reset_time),
                is_blocked: window.attempts >= self.config.max_attempts,
                remaining_attempts: self.config.max_attempts.saturating_sub(window.attempts),
            },
            None => RateLimitState {
                attempt_count: 0,
                window_reset_at: None,
                is_blocked: false,
                remaining_attempts: self.config.max_attempts,
            },
        }
    }

    // Load the active window, dropping it if it has elapsed or cannot be parsed
    fn active_window(&self, now_ms: i64) -> Option<PersistedWindow> {
        let key = &self.config.storage_key;

        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read rate limit state {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str::<PersistedWindow>(&raw) {
            Ok(window) if now_ms < window.reset_time => Some(window),
            Ok(_) => {
                debug!("Rate limit window {} elapsed, clearing", key);
                self.discard(key);
                None
            }
            Err(e) => {
                warn!("Discarding unreadable rate limit state {}: {}", key, e);
                self.discard(key);
                None
            }
        }
    }

    fn discard(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!("Failed to clear rate limit state {}: {}", key, e);
        }
    }

    /// Current window, or a fresh state when none is active.
    pub fn current_state(&self) -> RateLimitState {
        let now_ms = self.clock.now().timestamp_millis();
        let window = self.active_window(now_ms);
        self.state_from(window.as_ref())
    }

    /// Count one attempt, opening a new window if none is active.
    pub fn record_attempt(&self) -> Result<RateLimitState, StorageError> {
        let now_ms = self.clock.now().timestamp_millis();

        let window = match self.active_window(now_ms) {
            Some(window) => PersistedWindow {
                attempts: window.attempts.saturating_add(1),
                reset_time: window.reset_time,
            },
            None => PersistedWindow {
                attempts: 1,
                reset_time: now_ms.saturating_add(self.config.window.as_millis() as i64),
            },
        };

        let raw = serde_json::to_string(&window)?;
        self.store.set(&self.config.storage_key, &raw)?;

        let state = self.state_from(Some(&window));
        debug!(
            "Recorded attempt {}/{} for {}",
            state.attempt_count, self.config.max_attempts, self.config.storage_key
        );
        Ok(state)
    }

    /// Clear the window explicitly (used after a successful registration).
    pub fn reset(&self) -> Result<(), StorageError> {
        self.store.remove(&self.config.storage_key)
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.current_state().remaining_attempts
    }

    pub fn time_until_reset(&self) -> Duration {
        let now = self.clock.now();
        self.current_state()
            .window_reset_at
            .and_then(|reset_at| (reset_at - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

/// Drop every window under `key_prefix` that has elapsed or cannot be read.
///
/// Windows are otherwise only cleared when their own client reads them again.
pub fn purge_expired(
    store: &dyn KeyValueStore,
    key_prefix: &str,
    now: DateTime<Utc>,
) -> Result<usize, StorageError> {
    let now_ms = now.timestamp_millis();
    store.retain(&|key, raw| {
        if !key.starts_with(key_prefix) {
            return true;
        }
        serde_json::from_str::<PersistedWindow>(raw)
            .map(|window| now_ms < window.reset_time)
            .unwrap_or(false)
    })
}

/// Countdown text as (French, English): seconds under a minute, minutes
/// (rounded up) otherwise.
pub fn countdown_parts(remaining: Duration) -> (String, String) {
    let seconds = remaining.as_millis().div_ceil(1000);
    if seconds < 60 {
        let plural = if seconds > 1 { "s" } else { "" };
        return (
            format!("{} seconde{}", seconds, plural),
            format!("{} second{}", seconds, plural),
        );
    }

    let minutes = seconds.div_ceil(60);
    let plural = if minutes > 1 { "s" } else { "" };
    (
        format!("{} minute{}", minutes, plural),
        format!("{} minute{}", minutes, plural),
    )
}

pub fn format_time_until_reset(remaining: Duration) -> String {
    let (fr, en) = countdown_parts(remaining);
    format!("{} / {}", fr, en)
}
