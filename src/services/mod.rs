pub mod clock;
pub mod database;
pub mod form;
pub mod rate_limiter;
pub mod storage;
pub mod submission;
pub mod validation;

#[cfg(test)]
#[path = "database_test.rs"]
mod database_test;
