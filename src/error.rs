use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Bridge answered, but with a non-"ok" result
    #[error("signaling failed: {0}")]
    SignalingRejected(String),

    /// Bridge could not be reached or answered with garbage
    #[error("signaling request failed")]
    SignalingRequest,

    #[error("signaling channel failed: {0}")]
    SignalingChannel(String),

    #[error("Malformed signaling message: {0}")]
    MalformedMessage(String),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Message shown to UI surfaces when this error ends an attempt
    pub fn status_message(&self) -> String {
        self.to_string()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signaling_messages() {
        assert_eq!(
            AppError::SignalingRejected("auth_error".to_string()).status_message(),
            "signaling failed: auth_error"
        );
        assert_eq!(
            AppError::SignalingRequest.status_message(),
            "signaling request failed"
        );
    }
}
