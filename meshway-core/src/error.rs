/// Core error types shared by the routing kernel.
///
/// Endpoint-specific errors live next to the endpoint type in
/// `crate::endpoint`; this module holds the payload and route-table errors.
use thiserror::Error;

/// Errors raised while decoding a typed message payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Payload ended before the declared structure was complete.
    #[error("truncated payload for `{0}`")]
    Truncated(&'static str),

    /// Payload bytes do not form a valid value.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl PayloadError {
    /// Create a malformed-payload error with a message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Errors raised by route-table mutations.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Two handlers claimed the same `(endpoint, key)` without sharing a
    /// target group.
    #[error("duplicate handler for ({endpoint}, {key})")]
    DuplicateHandler { endpoint: String, key: String },
}
