use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ControllerState;

/// Broad error category used for rendering and logging decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// The server refused the caller's credentials or session.
    Auth,
    /// The server answered with a status the flow does not expect.
    Protocol,
    /// The server-push channel failed to open or dropped.
    Channel,
    /// The request never produced an HTTP status.
    Transport,
    /// A response body could not be decoded.
    Serialization,
    /// Invalid endpoint or other configuration problem.
    Config,
    /// Invariant break inside the controller.
    Internal,
}

/// Stable controller error payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message; rendered verbatim for HTTP errors.
    pub message: String,
    /// HTTP status when the error came from a response.
    pub status: Option<u16>,
}

impl ChatError {
    /// Construct a new error.
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Error for a response whose status the flow does not accept.
    ///
    /// The message is `"<status> <status text>"`, matching what is rendered.
    pub fn unexpected_status(status: u16, status_text: &str) -> Self {
        let message = format!("{status} {status_text}").trim_end().to_owned();
        Self {
            category: classify_http_status(status),
            code: "unexpected_status".to_owned(),
            message,
            status: Some(status),
        }
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ControllerState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while controller is in state {current:?}"),
        )
    }

    /// The push channel ended without reporting an error.
    pub fn channel_closed() -> Self {
        Self::new(
            ChatErrorCategory::Channel,
            "event_channel_closed",
            "server closed the event stream",
        )
    }

    /// The request failed before any status arrived.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ChatErrorCategory::Transport, "transport_error", message)
    }

    /// Text shown in the error-kind message for this failure.
    pub fn display_text(&self) -> String {
        match self.category {
            ChatErrorCategory::Channel => format!("Event channel failed: {}", self.message),
            _ if self.status.is_some() => self.message.clone(),
            _ => format!("{} ({})", self.message, self.code),
        }
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ChatErrorCategory {
    match status {
        401 | 403 => ChatErrorCategory::Auth,
        400..=499 => ChatErrorCategory::Protocol,
        500..=599 => ChatErrorCategory::Transport,
        _ => ChatErrorCategory::Protocol,
    }
}
