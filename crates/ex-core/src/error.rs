//! Normalized, UI-facing query errors.

use serde::{Deserialize, Serialize};

/// Message shown when a backend failure cannot be classified. The original
/// payload is still logged and forwarded to the event bridge.
pub const UNKNOWN_ERROR_MESSAGE: &str = "unknown error, see logs";

/// The common error shape surfaced to the UI layer. When `key` is set the
/// error is scoped to that query row; otherwise it applies to the pane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryError {
    pub key: Option<String>,
    pub message: String,
    pub detail: Option<String>,
}

impl QueryError {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            key: None,
            message: message.into(),
            detail: None,
        }
    }

    pub fn unknown() -> Self {
        Self::message(UNKNOWN_ERROR_MESSAGE)
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.message, detail),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for QueryError {}
