use std::error::Error as StdError;

/// Crate-wide result type for messaging client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed errors returned by [`crate::MessagingClient`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The client has no live connection to the network.
    #[error("not connected")]
    NotConnected,

    /// The network side did not answer in time.
    #[error("timed out waiting for {operation}")]
    Timeout { operation: String },

    /// The network side answered but refused the operation.
    #[error("request rejected: {message}")]
    Rejected { message: String },

    /// Wrapped source error from the transport or bridge.
    #[error("{context}: {source}")]
    Upstream {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn timeout(operation: impl std::fmt::Display) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
        }
    }

    #[must_use]
    pub fn rejected(message: impl std::fmt::Display) -> Self {
        Self::Rejected {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn upstream(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Upstream {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
