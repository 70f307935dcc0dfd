//! Error types for psd2-client.

/// Result type alias for psd2-client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for psd2-client operations.
///
/// HTTP failures that the retry engine gives up on are not errors; they are
/// returned as [`ApiFailure`](crate::ApiFailure) values instead.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional source error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Create a new error with the given kind and source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if the request never produced an HTTP response.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Connection(_)
                | ErrorKind::Timeout
                | ErrorKind::TooManyRedirects { .. }
                | ErrorKind::RedirectProtocol(_)
        )
    }

    /// Returns true if the token endpoint answered without a usable token.
    pub fn is_auth_token_error(&self) -> bool {
        matches!(self.kind, ErrorKind::AuthToken(_))
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Invalid configuration or failed transport initialization.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unsupported HTTP method.
    #[error("Invalid method '{method}'. The method used to send your request needs to be one of the following: {allowed}")]
    InvalidMethod { method: String, allowed: String },

    /// Parameters the builder cannot serialize.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Token endpoint reachable but returned no usable token.
    #[error("Could not retrieve auth token: {0}")]
    AuthToken(String),

    /// No decoder registered for the requested response type.
    #[error("Unsupported response type '{0}'. Register a decoder for it, or use raw")]
    UnsupportedResponseType(String),

    /// Header name or value rejected by the transport.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Redirect limit exceeded.
    #[error("Will not follow more than {max} redirects")]
    TooManyRedirects { max: usize },

    /// Redirect to a scheme outside the allowed protocols.
    #[error("Redirect to disallowed protocol: {0}")]
    RedirectProtocol(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request timeout.
    #[error("Request timeout")]
    Timeout,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            ErrorKind::Connection(err.to_string())
        } else if err.is_builder() {
            ErrorKind::Config(err.to_string())
        } else {
            ErrorKind::Other(err.to_string())
        };

        Error::with_source(kind, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}

impl From<serde_urlencoded::ser::Error> for Error {
    fn from(err: serde_urlencoded::ser::Error) -> Self {
        Error::with_source(ErrorKind::Serialization(err.to_string()), err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::with_source(ErrorKind::InvalidUrl(err.to_string()), err)
    }
}
