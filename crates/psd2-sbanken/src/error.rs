//! Error types for psd2-sbanken.

use psd2_client::{ApiFailure, Ticket};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    pub kind: ErrorKind,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Wrap a failing API response with the message of the operation.
    pub(crate) fn api(message: &'static str, failure: ApiFailure) -> Self {
        Self {
            kind: ErrorKind::Api {
                status: failure.status,
                message: message.to_string(),
            },
            source: Some(Box::new(failure)),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation(message.into()))
    }

    /// The failing response, when the API answered with an error status.
    pub fn api_failure(&self) -> Option<&ApiFailure> {
        self.source.as_ref()?.downcast_ref::<ApiFailure>()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("Client error: {0}")]
    Client(String),

    /// The API answered with an error status.
    #[error("{message} (status {status})")]
    Api { status: u16, message: String },

    /// The API answered with a success status but the body does not look
    /// like a successful result.
    #[error("{0}")]
    IntegrationSemantic(String),

    /// Arguments rejected before any request was made.
    #[error("{0}")]
    Validation(String),

    #[error("Could not set endpoint '{0}'. Make sure that you are trying to use an existing endpoint")]
    UnknownEndpoint(String),

    /// The client is in queueing mode; the request waits for a flush.
    #[error("Request {0} was queued. Flush the client to send it")]
    Queued(Ticket),
}

impl From<psd2_client::Error> for Error {
    fn from(err: psd2_client::Error) -> Self {
        Error {
            kind: ErrorKind::Client(err.to_string()),
            source: Some(Box::new(err)),
        }
    }
}
