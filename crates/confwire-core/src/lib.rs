//! # confwire core
//!
//! The reader contract, scheme registry and subscription machinery shared by
//! every confwire transport.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │   Application   │───▶│     Registry     │───▶│   ConfReader    │
//! │   (URI string)  │    │ (scheme → ctor)  │    │ (file, http...) │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//!                                                        │
//!                                                        ▼
//!                        ┌──────────────────┐    ┌─────────────────┐
//!                        │   ReadEvent      │◀───│   EventSink     │
//!                        │   queue (1)      │    │ (subscription)  │
//!                        └──────────────────┘    └─────────────────┘
//! ```
//!
//! Transports implement [`ConfReader`] and expose a `register` function that
//! adds their schemes to a [`Registry`]. Subscriptions deliver [`ReadEvent`]s
//! through a queue of depth [`EVENT_QUEUE_DEPTH`]; streaming transports drive
//! it with [`run_resilient`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod error;
pub mod event;
pub mod query;
pub mod reader;
pub mod resilient;
pub mod retry;
pub mod scheme;

pub use error::{Error, Result};
pub use event::ReadEvent;
pub use query::{basic_auth, CommonConfig, QueryParams, DEFAULT_TIMEOUT, HEADER_PREFIX};
pub use reader::{ConfReader, EventSink, ReaderState, EVENT_QUEUE_DEPTH};
pub use resilient::{run_resilient, StreamConnector};
pub use retry::{retry_fixed, RetryPolicy, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY};
pub use scheme::{expect_scheme, parse_uri, ReaderConstructor, Registry, Scheme};

// Re-exported so transports and callers share one token type.
pub use tokio_util::sync::CancellationToken;
