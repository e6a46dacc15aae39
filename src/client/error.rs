use thiserror::Error;

use crate::server::ApiError;

/// Errors surfaced by the client interface
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Version mismatch on write; re-fetch and retry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The watch resume point is no longer retained by the server; re-list
    #[error("Watch expired: {0}")]
    Expired(String),

    #[error("HTTP error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("API error: {status} - {message}")]
    Server { status: u16, message: String },

    /// The caller asked the operation to stop; not a failure
    #[error("Stop requested")]
    StopRequested,
}

impl ClientError {
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            404 => ClientError::NotFound(message),
            409 => ClientError::Conflict(message),
            410 => ClientError::Expired(message),
            _ => ClientError::Server { status, message },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

impl From<ApiError> for ClientError {
    fn from(e: ApiError) -> Self {
        ClientError::from_status(e.status_code().as_u16(), e.to_string())
    }
}
