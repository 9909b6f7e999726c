use thiserror::Error;

use crate::session::Phase;

/// Everything a user action can fail with. None of these are fatal to the
/// process; the front-end that triggered the action renders them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChatError {
    /// A required field was missing. User-correctable.
    #[error("{0}")]
    Validation(String),

    #[error("cannot {action} while the session is {phase}")]
    Phase { action: &'static str, phase: Phase },

    /// A streamed reply outlived the conversation it belonged to.
    #[error("the session was reset before the reply finished")]
    Reset,

    /// The completion API rejected the request or sent something unusable.
    #[error("completion API error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upstream { status: Option<u16>, message: String },

    /// The completion API could not be reached.
    #[error("could not reach completion API: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Phase,
    Reset,
    Upstream,
    Network,
}

impl ErrorKind {
    /// Stable, machine-readable name for front-ends.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Phase => "phase",
            ErrorKind::Reset => "reset",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Network => "network",
        }
    }
}

impl ChatError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        ChatError::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Validation(_) => ErrorKind::Validation,
            ChatError::Phase { .. } => ErrorKind::Phase,
            ChatError::Reset => ErrorKind::Reset,
            ChatError::Upstream { .. } => ErrorKind::Upstream,
            ChatError::Network(_) => ErrorKind::Network,
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        // A body we could not decode came from the service, not the wire.
        if err.is_decode() {
            return ChatError::upstream(err.status().map(|s| s.as_u16()), err.to_string());
        }
        ChatError::Network(err.to_string())
    }
}
