use serde::{Deserialize, Serialize};

/// JSON body for transport-level rejections (401, 429). Tool-level errors
/// travel inside the protocol's own framing, so this envelope only ever
/// carries a failure message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    success: bool,
    message: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        ErrorResponse {
            success: false,
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
