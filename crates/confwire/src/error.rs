//! Loader errors.

use crate::format::Format;
use thiserror::Error;

/// Failure to produce a typed configuration.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The reader failed
    #[error(transparent)]
    Reader(#[from] confwire_core::Error),

    /// The payload format could not be determined
    #[error("cannot determine format of {uri}: {reason}")]
    Format {
        /// Source URI
        uri: String,
        /// What was missing or unsupported
        reason: String,
    },

    /// The source returned no data
    #[error("empty configuration data")]
    Empty,

    /// The payload is not valid for its format
    #[error("failed to decode {format} configuration: {reason}")]
    Decode {
        /// Format the payload was decoded as
        format: Format,
        /// Decoder message
        reason: String,
    },

    /// The decoded tree does not fit the destination type
    #[error("failed to map configuration: {0}")]
    Mapping(#[source] serde_json::Error),
}

impl LoadError {
    /// Reader error behind this failure, if any.
    pub fn reader_error(&self) -> Option<&confwire_core::Error> {
        match self {
            LoadError::Reader(err) => Some(err),
            _ => None,
        }
    }
}
