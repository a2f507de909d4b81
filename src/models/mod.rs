pub mod common;
pub mod registration;
