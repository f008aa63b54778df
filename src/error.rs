//! Error types for the session client.

use std::time::Duration;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Generic message shown to users for any failure that is not a field error.
pub const GENERIC_FAILURE_MESSAGE: &str = "Request failed. Please reload and try again.";

/// Errors surfaced by the session client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client-side input failed a schema check; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The backend answered with a non-2xx status.
    #[error("HTTP error ({status}): {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The refresh endpoint failed; the session has been torn down.
    #[error("Session refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    /// Transport failure, no response received.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error category used by callers to pick a user-facing treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Request,
    Refresh,
    Network,
}

impl Error {
    /// Create an HTTP error.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Error::Http {
            status,
            body: body.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Refresh(_) => ErrorKind::Refresh,
            Error::Network(_) => ErrorKind::Network,
            Error::Http { .. } | Error::Json(_) | Error::Config(_) | Error::Io(_) => {
                ErrorKind::Request
            }
        }
    }

    /// Message suitable for showing to the user.
    ///
    /// Validation failures carry their own field message; everything else
    /// collapses to [`GENERIC_FAILURE_MESSAGE`].
    pub fn user_message(&self) -> &str {
        match self {
            Error::Validation(err) => &err.message,
            _ => GENERIC_FAILURE_MESSAGE,
        }
    }

    /// Status code of an HTTP error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::Refresh(RefreshError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// Check if this is an authorization failure.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// A field failed client-side validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Form field the message belongs next to.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Why a refresh did not produce a new access token.
///
/// `Clone` because one failure is delivered to every queued waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// The refresh endpoint answered with a non-2xx status.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The refresh call never got a response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The refresh response was missing `access_token`.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Waited too long on a refresh started by another request.
    #[error("timed out after {0:?} waiting for refresh")]
    TimedOut(Duration),

    /// The request driving the refresh was dropped before it settled, or the
    /// session was cleared or replaced while it was in flight.
    #[error("refresh abandoned before it settled")]
    Abandoned,
}

impl RefreshError {
    /// Whether the refresh credential is known to be unusable.
    ///
    /// `TimedOut` and `Abandoned` only describe this caller's wait; the
    /// refresh itself may still succeed for someone else.
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            RefreshError::Rejected { .. } | RefreshError::Transport(_) | RefreshError::Malformed(_)
        )
    }
}
