//! Error taxonomy for the credential and mailbox layer.
//!
//! Callers branch on the variant: `Unauthenticated` means the user has to go
//! through interactive authorization again, everything else is an upstream
//! or infrastructure failure.

use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No stored grant, or the stored grant has no refresh token.
    #[error("user {user_id} is not authenticated or is missing a refresh token")]
    Unauthenticated { user_id: String },

    /// Token endpoint rejected the request or could not be reached.
    #[error("identity provider {operation} failed: {message}")]
    AuthProvider {
        operation: &'static str,
        message: String,
    },

    /// Mailbox API answered with a non-2xx status.
    #[error("mailbox API returned {status}: {body}")]
    MailboxApi { status: u16, body: String },

    /// Request never produced a response (DNS, TLS, connection reset).
    #[error("{operation} request failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Per-user persistence failure (token sets, preferences).
    #[error("storage for {user_id} failed: {message}")]
    Store { user_id: String, message: String },

    /// Interaction log could not be read or appended to.
    #[error("interaction log failed: {message}")]
    Log { message: String },

    #[error("completion provider failed: {message}")]
    Completion {
        status: Option<u16>,
        message: String,
    },

    /// The interaction log holds too few paired replies to train on.
    #[error("not enough sent replies to fine-tune: found {found}, need {required}")]
    InsufficientTrainingData { found: usize, required: usize },

    #[error("invalid {operation} response: {message}")]
    InvalidResponse {
        operation: &'static str,
        message: String,
    },
}

impl Error {
    pub fn unauthenticated(user_id: impl Into<String>) -> Self {
        Self::Unauthenticated {
            user_id: user_id.into(),
        }
    }

    pub fn store(user_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Store {
            user_id: user_id.into(),
            message: message.to_string(),
        }
    }

    pub fn log(message: impl std::fmt::Display) -> Self {
        Self::Log {
            message: message.to_string(),
        }
    }

    /// Map a reqwest failure, keeping timeouts distinct from other transport errors.
    pub fn transport(operation: &'static str, after: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { operation, after }
        } else {
            Self::Transport {
                operation,
                message: err.to_string(),
            }
        }
    }

    /// HTTP status a route layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated { .. } => 401,
            _ => 500,
        }
    }

    /// Detail safe to hand back to a client; suppressed outside development.
    pub fn public_detail(&self, development: bool) -> Option<String> {
        development.then(|| self.to_string())
    }

    /// Whether a caller may retry with backoff.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::AuthProvider { .. } | Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::MailboxApi { status, .. } => *status == 429 || *status >= 500,
            Self::Completion { status, .. } => status.is_none_or(|s| s == 429 || s >= 500),
            _ => false,
        }
    }

    /// The mailbox API refused the bearer token.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::MailboxApi { status: 401 | 403, .. })
    }
}
