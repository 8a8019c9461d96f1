/// Errors raised while opening or reading an answer stream.
///
/// These never cross the session manager's public contract; the manager
/// converts them into an `Errored` session with a generic message and logs
/// the detail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The stream URL could not be parsed.
    #[error("invalid stream url {url:?}: {message}")]
    InvalidUrl { url: String, message: String },
    /// The HTTP client could not be constructed.
    #[error("transport setup failed: {0}")]
    Setup(String),
    /// The request never produced a response (DNS, connect, TLS, timeout).
    #[error("stream request failed: {0}")]
    Request(String),
    /// The server answered with a non-success status.
    #[error("stream request returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// Reading the response body failed mid-stream.
    #[error("stream read failed: {0}")]
    Read(String),
}

impl TransportError {
    /// Creates an invalid-url error.
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a request-level error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request(message.into())
    }

    /// Creates a mid-stream read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read(message.into())
    }

    /// Returns `true` when the failure happened after the stream was open.
    pub fn is_mid_stream(&self) -> bool {
        matches!(self, Self::Read(_))
    }
}

/// Errors returned by a `ChatApi` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatApiError {
    /// Network or protocol failure talking to the chat backend.
    #[error("chat api request failed: {0}")]
    Request(String),
    /// The backend refused the message (validation, auth, quota).
    #[error("chat api rejected the message: {0}")]
    Rejected(String),
}

impl ChatApiError {
    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Request(message) | Self::Rejected(message) => message,
        }
    }
}

/// Invalid stream client configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that does not parse.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    /// A setting is out of its accepted range.
    #[error("config error: {0}")]
    OutOfRange(String),
}
