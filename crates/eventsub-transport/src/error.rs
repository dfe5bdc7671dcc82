//! Error handling for the transport layer.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// The main result type used throughout the transport layer.
pub type TransportResult<T> = Result<T, TransportError>;

/// Error type for all transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request errors (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The credential was refused by the API (HTTP 401).
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API error response
    #[error("API error: status={status}, body={body}")]
    Api { status: StatusCode, body: String },

    /// The API accepted the request but declined to act on it.
    #[error("Rejected: {message}")]
    Rejected { message: String },

    /// WebSocket errors
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// The remote end closed the stream.
    #[error("Connection closed{}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    ConnectionClosed { reason: Option<String> },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket {
            message: e.to_string(),
        }
    }
}

impl TransportError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a connection closed error.
    pub fn connection_closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed { reason }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Create an API error.
    pub fn api(status: StatusCode, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    /// Whether retrying with the same credential is pointless.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TransportError::config("Invalid URL");
        assert!(matches!(err, TransportError::Config { .. }));

        let err = TransportError::timeout(Duration::from_secs(5));
        assert!(matches!(err, TransportError::Timeout { .. }));

        let err = TransportError::unauthorized("bad token");
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_api_error_is_not_unauthorized() {
        let err = TransportError::api(StatusCode::FORBIDDEN, "nope");
        assert!(!err.is_unauthorized());
        assert_eq!(err.to_string(), "API error: status=403 Forbidden, body=nope");
    }

    #[test]
    fn test_websocket_error_conversion() {
        let err = TransportError::from(tokio_tungstenite::tungstenite::Error::ConnectionClosed);
        assert!(matches!(err, TransportError::WebSocket { .. }));
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_connection_closed_display() {
        assert_eq!(
            TransportError::connection_closed(None).to_string(),
            "Connection closed"
        );
        assert_eq!(
            TransportError::connection_closed(Some("going away".into())).to_string(),
            "Connection closed: going away"
        );
    }
}
