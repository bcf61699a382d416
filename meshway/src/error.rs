/// Router error types.
///
/// Parse and framing errors propagate to the caller that initiated the
/// operation. Dispatch-time failures (no handler, type mismatch, handler
/// panic) are logged drops and never surface here.
use thiserror::Error;

use meshway_core::endpoint::EndpointError;
use meshway_core::error::RouteError;
use meshway_wire::FrameError;

/// Main error type for router operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Endpoint parse or misuse error.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// Frame codec error, including send-side unregistered types.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Route table error (duplicate handler keys).
    #[error(transparent)]
    Route(#[from] RouteError),

    /// The named channel refused the frame because it is closed.
    #[error("channel `{0}` is closed")]
    ChannelClosed(String),

    /// Reply/cancel/abort on a request context that already completed.
    #[error("transaction already completed")]
    TransactionCompleted,

    /// A query ran out of time.
    #[error("session timed out")]
    SessionTimeout,

    /// The peer cancelled the session.
    #[error("session cancelled: {0}")]
    Cancelled(String),

    /// The router has not been started or has been stopped.
    #[error("router is not running")]
    NotRunning,

    /// Invalid session handler configuration.
    #[error("invalid session configuration: {0}")]
    SessionConfig(String),
}

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;

impl RouterError {
    /// Whether the error ends a session from the caller's point of view.
    #[must_use]
    pub const fn is_session_end(&self) -> bool {
        matches!(self, Self::SessionTimeout | Self::Cancelled(_))
    }
}
