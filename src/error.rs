//! Error types for the AMI and FastAGI clients

use thiserror::Error;

/// Result alias used throughout the crate.
pub type AmiResult<T> = Result<T, AmiError>;

/// Errors raised by the AMI and FastAGI clients.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AmiError {
    /// TCP connect did not complete within the connect budget.
    #[error("connect timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// No bytes became available within the read budget.
    #[error("recv buffer was empty for {timeout_ms}ms")]
    ReadTimeout { timeout_ms: u64 },

    /// The kernel send buffer stayed full past the write budget.
    #[error("send buffer was full for {timeout_ms}ms")]
    WriteTimeout { timeout_ms: u64 },

    /// The peer closed the connection, or the socket was poisoned by an
    /// earlier failure. A socket that has failed once is never reused.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation attempted on a client that is not connected.
    #[error("not connected")]
    NotConnected,

    /// A single line grew past the framer's buffer ceiling.
    #[error("line exceeds the {limit} byte buffer ceiling")]
    OversizedLine { limit: usize },

    /// `switch_to_compressed()` was called a second time.
    #[error("gzip is active already")]
    AlreadyCompressed,

    /// The gzip stream could not be decompressed.
    #[error("gzip stream error: {0}")]
    Decompress(#[from] flate2::DecompressError),

    /// A message block could not be decoded. Recoverable: the connection
    /// stays up and the block is discarded.
    #[error("malformed message: {message}")]
    MalformedMessage { message: String },

    /// A list response declared a different item count than was received.
    /// Recoverable: the accumulated items are still delivered.
    #[error("list declared {declared} items but {received} arrived")]
    ListCountMismatch { declared: usize, received: usize },

    /// No response arrived for an action within the action timeout.
    #[error("no response to {action} within {timeout_ms}ms")]
    ActionTimeout { action: String, timeout_ms: u64 },

    /// The server answered `Response: Error`.
    #[error("action failed: {message}")]
    ActionFailed { message: String },

    /// An activity did not reach a terminal event before its deadline.
    #[error("activity {name} timed out after {timeout_ms}ms")]
    ActivityTimedOut { name: String, timeout_ms: u64 },

    /// An activity reached a terminal failure. Carries the triggering
    /// event or action-failure reason.
    #[error("activity {name} failed: {reason}")]
    ActivityFailed { name: String, reason: String },

    /// Login was rejected by the server.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AmiError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        AmiError::MalformedMessage {
            message: message.into(),
        }
    }

    pub(crate) fn auth_failed(message: impl Into<String>) -> Self {
        AmiError::AuthenticationFailed {
            message: message.into(),
        }
    }

    pub(crate) fn activity_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        AmiError::ActivityFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
