//! Convention Registration Service
//!
//! This library hosts the registration pipeline of the bilingual
//! (French/English) convention site: field sanitization and validation, a
//! persisted attempt-window rate limiter, a submission state machine and the
//! hosted database client that stores accepted registrations.
//!
//! # Modules
//!
//! - `services::validation`: pure sanitize/validate rules with bilingual messages
//! - `services::rate_limiter`: attempt window persisted through a key-value store
//! - `services::submission`: submission state machine
//! - `services::form`: drives one form through validate, throttle and store
//! - `client`: `RemoteStore` trait and the REST client for the hosted table
//! - `auth`: publishable key handling for the hosted database
//!
//! # Storage
//!
//! Registrations go to a hosted table through its REST interface. In
//! simulation mode a local CSV file stands in for it with the same duplicate
//! rules.

pub mod auth;
pub mod client;
pub mod config;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

#[cfg(test)]
pub mod client_mock;


// Re-export the main API types for ease of use
pub use auth::SupabaseAuth;
pub use client::{RemoteError, RemoteStore, SupabaseClient};
pub use config::{AppConfig, ConfigError, StoreBackend};
pub use handlers::api::AppState;
pub use routes::create_router;
