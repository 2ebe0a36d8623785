//! Error types shared by the history store, the LLM client and the session.

use thiserror::Error;

/// Errors surfaced to the presentation layer.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid or missing configuration (for example no API key). Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),
    /// The query was empty or whitespace only.
    #[error("please enter a question")]
    EmptyQuery,
    /// A new display name was empty or whitespace only.
    #[error("display name cannot be empty")]
    EmptyName,
    /// Transport failure: connection refused, reset, or timeout.
    #[error("network error: {0}")]
    Network(String),
    /// The API answered with a non-success status.
    #[error("API Error: {status} - {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body, kept verbatim.
        body: String,
    },
    /// Filesystem error while reading or writing history records.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A history record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The history record does not exist (already gone).
    #[error("history record not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<url::ParseError> for ChatError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid url: {err}"))
    }
}

impl ChatError {
    /// Whether the user can keep working after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

/// Convenience result alias.
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_renders_status_and_body() {
        let err = ChatError::Api {
            status: 401,
            body: "{\"error\":\"invalid key\"}".to_string(),
        };
        assert_eq!(err.to_string(), "API Error: 401 - {\"error\":\"invalid key\"}");
    }

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(!ChatError::Config("missing key".to_string()).is_recoverable());
        assert!(ChatError::Network("reset".to_string()).is_recoverable());
        assert!(ChatError::NotFound("abc".to_string()).is_recoverable());
        assert!(ChatError::EmptyQuery.is_recoverable());
    }

    #[test]
    fn test_io_errors_convert() {
        let err: ChatError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, ChatError::Io(_)));
        assert!(err.is_recoverable());
    }
}
