use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::services::form::{FormSettings, DEFAULT_SUCCESS_RESET_DELAY};
use crate::services::rate_limiter::RateLimitConfig;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_SUPABASE_TABLE: &str = "inscriptions";
pub const DEFAULT_RATE_LIMIT_STORE_PATH: &str = "/app/data/rate_limits.json";
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),
    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Where registrations are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Supabase {
        url: String,
        publishable_key: String,
        table: String,
    },
    /// Simulation mode: a local CSV file stands in for the hosted table
    Csv { path: Option<String> },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub is_production: bool,
    pub port: u16,
    pub backend: StoreBackend,
    pub rate_limit_store_path: String,
    pub rate_limit: RateLimitConfig,
    pub success_reset_delay: Duration,
    pub remote_timeout: Duration,
}

impl AppConfig {
    /// Load from the process environment (after `.env`, if any).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let is_production = var("ENVIRONMENT")
            .map(|val| val.to_lowercase() == "production")
            .unwrap_or(false);

        let port = parse_or(&var, "PORT", DEFAULT_PORT)?;

        let backend = match var("STORE_BACKEND").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("supabase") => StoreBackend::Supabase {
                url: var("SUPABASE_URL").ok_or(ConfigError::Missing("SUPABASE_URL"))?,
                publishable_key: var("SUPABASE_PUBLISHABLE_KEY")
                    .ok_or(ConfigError::Missing("SUPABASE_PUBLISHABLE_KEY"))?,
                table: var("SUPABASE_TABLE").unwrap_or_else(|| DEFAULT_SUPABASE_TABLE.to_string()),
            },
            Some("csv") => StoreBackend::Csv {
                path: var("REGISTRATION_CSV_PATH"),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let defaults = RateLimitConfig::default();
        let max_attempts = parse_or(&var, "RATE_LIMIT_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "RATE_LIMIT_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        let window_ms = parse_or(
            &var,
            "RATE_LIMIT_WINDOW_MS",
            defaults.window.as_millis() as u64,
        )?;

        let success_reset_delay = Duration::from_millis(parse_or(
            &var,
            "SUCCESS_RESET_DELAY_MS",
            DEFAULT_SUCCESS_RESET_DELAY.as_millis() as u64,
        )?);
        let remote_timeout = Duration::from_secs(parse_or(
            &var,
            "REMOTE_TIMEOUT_SECS",
            DEFAULT_REMOTE_TIMEOUT.as_secs(),
        )?);

        Ok(Self {
            is_production,
            port,
            backend,
            rate_limit_store_path: var("RATE_LIMIT_STORE_PATH")
                .unwrap_or_else(|| DEFAULT_RATE_LIMIT_STORE_PATH.to_string()),
            rate_limit: RateLimitConfig {
                max_attempts,
                window: Duration::from_millis(window_ms),
                ..defaults
            },
            success_reset_delay,
            remote_timeout,
        })
    }

    pub fn form_settings(&self) -> FormSettings {
        FormSettings {
            success_reset_delay: self.success_reset_delay,
            log_remote_detail: !self.is_production,
        }
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
