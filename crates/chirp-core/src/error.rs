use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level category for chat errors so callers can branch on broad
/// handling strategy without string matching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Invalid input or unsupported configuration.
    Config,
    /// A referenced room or message does not exist.
    NotFound,
    /// Connectivity or transport failure.
    Network,
    /// The backend asked us to slow down.
    RateLimited,
    /// Local persistence failure.
    Storage,
    /// Encoding or decoding failure at a data boundary.
    Serialization,
    /// A bug or broken invariant inside the client stack.
    Internal,
}

/// Stable error shape crossing the SDK boundary.
///
/// `code` is machine-readable and stable across releases; `message` is
/// human-readable and may change freely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// Broad classification used for handling decisions.
    pub category: ChatErrorCategory,
    /// Stable machine-readable code, e.g. `room_not_found`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Optional server-provided backoff hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ChatError {
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after_ms(mut self, retry_after_ms: u64) -> Self {
        self.retry_after_ms = Some(retry_after_ms);
        self
    }

    /// Shorthand for lookups addressing a room that does not exist.
    pub fn room_not_found(room_id: &str) -> Self {
        Self::new(
            ChatErrorCategory::NotFound,
            "room_not_found",
            format!("room '{room_id}' does not exist"),
        )
    }

    /// Shorthand for operations addressing a message that does not exist.
    pub fn message_not_found(serial: impl std::fmt::Display) -> Self {
        Self::new(
            ChatErrorCategory::NotFound,
            "message_not_found",
            format!("message '{serial}' does not exist"),
        )
    }

    /// Shorthand for internal invariant violations.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ChatErrorCategory::Internal, "invalid_state", message)
    }

    /// Whether retrying the same operation later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category,
            ChatErrorCategory::Network | ChatErrorCategory::RateLimited
        )
    }
}
