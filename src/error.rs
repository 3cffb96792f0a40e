//! Error types for AMI operations

use thiserror::Error;

/// Boxed error returned by event handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for AMI client and listener operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AmiError {
    /// TCP connection could not be opened (DNS failure, refusal, timeout)
    #[error("connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    /// Server rejected the Login action
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Peer sent something that is not AMI
    #[error("protocol error: {message}")]
    ProtocolError { message: String },

    /// Peer closed the stream (EOF)
    #[error("connection closed")]
    ConnectionClosed,

    /// An event handler returned an error or panicked
    #[error("handler for {event} failed: {message}")]
    Handler { event: String, message: String },

    /// I/O error on an established connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No response within the configured timeout
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Operation requires an open connection
    #[error("not connected")]
    NotConnected,

    /// Action fields would break wire framing
    #[error("invalid action: {message}")]
    InvalidAction { message: String },

    /// Configuration file is unreadable or incomplete
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl AmiError {
    pub(crate) fn protocol_error(message: impl Into<String>) -> Self {
        AmiError::ProtocolError {
            message: message.into(),
        }
    }

    pub(crate) fn auth_failed(message: impl Into<String>) -> Self {
        AmiError::AuthenticationFailed {
            message: message.into(),
        }
    }

    pub(crate) fn config_error(message: impl Into<String>) -> Self {
        AmiError::Config {
            message: message.into(),
        }
    }

    pub(crate) fn connection_failed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        AmiError::Connection {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// `true` for failures that end the current session.
    ///
    /// The listener treats every one of these as a reason to back off and
    /// reconnect rather than a fatal condition.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AmiError::Connection { .. }
                | AmiError::ConnectionClosed
                | AmiError::Io(_)
                | AmiError::Timeout { .. }
                | AmiError::NotConnected
                | AmiError::ProtocolError { .. }
        )
    }
}

/// Result type alias using [`AmiError`].
pub type AmiResult<T> = Result<T, AmiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            AmiError::connection_failed("127.0.0.1:5038", "refused").to_string(),
            "connection to 127.0.0.1:5038 failed: refused"
        );
        assert_eq!(
            AmiError::auth_failed("Authentication failed").to_string(),
            "authentication failed: Authentication failed"
        );
        assert_eq!(
            AmiError::Timeout { timeout_ms: 5000 }.to_string(),
            "timed out after 5000ms"
        );
    }

    #[test]
    fn connection_errors_classified() {
        assert!(AmiError::ConnectionClosed.is_connection_error());
        assert!(AmiError::Timeout { timeout_ms: 1 }.is_connection_error());
        assert!(!AmiError::auth_failed("no").is_connection_error());
        assert!(!AmiError::Handler {
            event: "Hangup".into(),
            message: "boom".into()
        }
        .is_connection_error());
    }
}
