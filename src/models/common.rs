use serde::{Deserialize, Serialize};

pub const CLIENT_ID_HEADER: &str = "x-client-id";

// Generic error body for non-validation failures
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}
