//! Error types shared by every configuration reader.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while constructing or driving a reader.
#[derive(Error, Debug)]
pub enum Error {
    /// The URI could not be parsed or is missing a required part.
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri {
        /// The offending URI
        uri: String,
        /// What is wrong with it
        reason: String,
    },

    /// No reader is registered for the scheme.
    #[error("Unsupported URI scheme: '{0}'")]
    UnsupportedScheme(String),

    /// A scheme was registered twice.
    #[error("Scheme '{0}' is already registered")]
    DuplicateScheme(String),

    /// A query parameter or URI component has an invalid value.
    #[error("Invalid value for '{param}': {reason}")]
    InvalidConfig {
        /// Parameter name
        param: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Connection, handshake or request failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("Request to {url} failed with status {status}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// An operation did not complete in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The addressed key, field or resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Several values are addressable and no selector was given.
    #[error("{resource} contains multiple keys, please specify one: {}", keys.join(", "))]
    Ambiguous {
        /// Resource description
        resource: String,
        /// Every key present, sorted
        keys: Vec<String>,
    },

    /// The server refused the request: wrong value type, missing
    /// permission or failed authentication.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Malformed change notification or frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The change stream ended unexpectedly.
    #[error("Stream closed: {0}")]
    StreamClosed(String),

    /// File system watch failure.
    #[error("File watching error: {0}")]
    Watch(String),

    /// The reader has been closed.
    #[error("Reader is closed")]
    Closed,

    /// A subscription is already active on this reader.
    #[error("Reader is already subscribed")]
    AlreadySubscribed,

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Every retry attempt failed; carries the last failure.
    #[error("Failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error from the final attempt
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidConfig`].
    pub fn invalid_config(param: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::InvalidUri`].
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Transport and protocol failures are transient. Not-found, ambiguity,
    /// rejected requests, construction and state errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Status { .. }
                | Error::Timeout(_)
                | Error::Io(_)
                | Error::Protocol(_)
                | Error::StreamClosed(_)
        )
    }

    /// Whether this error reports a missing key, field or resource.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::RetriesExhausted { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether this error comes from a closed or busy reader.
    pub fn is_state(&self) -> bool {
        matches!(self, Error::Closed | Error::AlreadySubscribed | Error::Cancelled)
    }
}

/// Result type for reader operations.
pub type Result<T> = std::result::Result<T, Error>;
