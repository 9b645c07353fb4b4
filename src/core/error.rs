//! Error taxonomy for the session core.
//!
//! Failure classes map one-to-one onto how they surface:
//! - Setup and signaling failures are fatal to the session instance
//!   (connection state goes to `Failed`; recovery is teardown + reconnect).
//! - Capture permission failures are recoverable; they propagate out of
//!   `start_mic` and leave the session otherwise untouched.
//! - Malformed inbound messages and handler panics are isolated per
//!   message/handler and never reach the caller as errors.

use thiserror::Error;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Peer connection setup failed
    #[error("Setup failed: {0}")]
    Setup(String),

    /// Signaling exchange with the relay failed
    #[error("Signaling failed: {0}")]
    Signaling(String),

    /// Microphone capture was denied by the environment
    #[error("Microphone capture denied: {0}")]
    CapturePermission(String),

    /// Microphone device error (missing device, unsupported format)
    #[error("Capture device error: {0}")]
    CaptureDevice(String),

    /// Transport-level error from the peer connection or data channel
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Audio playback error
    #[error("Playback error: {0}")]
    Playback(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

impl From<webrtc::Error> for SessionError {
    fn from(e: webrtc::Error) -> Self {
        SessionError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::Setup("ice gathering stalled".to_string());
        assert!(err.to_string().contains("Setup failed"));

        let err = SessionError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: SessionError = parse_err.into();
        assert!(matches!(err, SessionError::Serialization(_)));
    }
}
