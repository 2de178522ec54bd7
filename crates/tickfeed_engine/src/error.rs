//! Error types for the log follower.

use crate::http::{Headers, HttpResponse};
use std::fmt;
use thiserror::Error;
use tickfeed_protocol::ProtocolError;

/// Result type for follower operations.
pub type FollowResult<T> = Result<T, FollowError>;

/// Errors returned by follower calls.
#[derive(Error, Debug)]
pub enum FollowError {
    /// Unsubscribe named a collection with no active subscription.
    #[error("no subscription for collection {0:?}")]
    UnknownCollection(String),

    /// An event label outside `"insert/update"` / `"delete"`.
    #[error("unknown event label {0:?}")]
    UnknownEvent(String),

    /// A poll loop is already running on this follower.
    #[error("follower is already running")]
    AlreadyRunning,

    /// A single step was requested while another step was processing,
    /// e.g. from one of its listeners.
    #[error("a poll is already in progress")]
    PollInProgress,

    /// The state fetch or a follow request failed; the follower stopped.
    #[error(transparent)]
    Fatal(#[from] FatalError),

    /// Wire data could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The poll thread could not be spawned.
    #[error("failed to spawn poll thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl FollowError {
    /// Returns true if the follower stopped because of this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FollowError::Fatal(_))
    }
}

/// Which request produced a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalErrorKind {
    /// The initial logger-state request.
    LoggerState,
    /// A logger-follow request.
    LoggerFollow,
}

impl FatalErrorKind {
    /// Returns the stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            FatalErrorKind::LoggerState => "E_LOGGERSTATE",
            FatalErrorKind::LoggerFollow => "E_LOGGERFOLLOW",
        }
    }
}

impl fmt::Display for FatalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A fatal protocol error, carrying the full response that caused it.
///
/// Status `0` means the transport failed before a response arrived; the
/// body then holds the transport's message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: status {status}")]
pub struct FatalError {
    /// Request that failed.
    pub kind: FatalErrorKind,
    /// Response status, or `0` for a transport failure.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl FatalError {
    /// Builds a fatal error from a response.
    pub fn from_response(kind: FatalErrorKind, response: HttpResponse) -> Self {
        Self {
            kind,
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }

    /// Returns true if no response was received at all.
    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }

    /// Returns the body as text, replacing invalid UTF-8.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
