//! Normalized change events delivered to subscribers.

use crate::error::Error;
use chrono::{DateTime, Utc};

/// A single update produced by a reader subscription.
///
/// Either carries the payload fetched after a change or the error that
/// prevented fetching it. Check [`ReadEvent::is_valid`] before using `data`.
#[derive(Debug)]
pub struct ReadEvent {
    /// URI of the source that produced the event
    pub source_uri: String,
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
    /// Raw payload, possibly empty
    pub data: Vec<u8>,
    /// Failure that replaced the payload
    pub error: Option<Error>,
}

impl ReadEvent {
    /// Create an event from the outcome of a fetch.
    pub fn new(source_uri: impl Into<String>, result: Result<Vec<u8>, Error>) -> Self {
        let (data, error) = match result {
            Ok(data) => (data, None),
            Err(err) => (Vec::new(), Some(err)),
        };
        Self {
            source_uri: source_uri.into(),
            timestamp: Utc::now(),
            data,
            error,
        }
    }

    /// Create a payload event.
    pub fn data(source_uri: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(source_uri, Ok(data))
    }

    /// Create an error event.
    pub fn failure(source_uri: impl Into<String>, error: Error) -> Self {
        Self::new(source_uri, Err(error))
    }

    /// True iff the event has no error and a non-empty payload.
    pub fn is_valid(&self) -> bool {
        self.error.is_none() && !self.data.is_empty()
    }

    /// Consume the event, returning the payload or the error.
    pub fn into_result(self) -> Result<Vec<u8>, Error> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.data),
        }
    }
}
