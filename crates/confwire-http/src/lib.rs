//! HTTP(S) reader for confwire.
//!
//! One-shot reads are plain GET requests retried with a fixed delay.
//! Subscriptions hold a Server-Sent Events stream open, emit one event per
//! SSE message and reconnect after `retry_delay` whenever the stream fails
//! or ends.
//!
//! Recognized query parameters: `timeout`, `retry_attempts`, `retry_delay`,
//! `header_<Name>`, `tls_insecure`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
mod reader;
pub mod sse;

pub use config::HttpConfig;
pub use reader::HttpReader;

use confwire_core::{ConfReader, Registry, Result, Scheme};

/// Schemes handled by this crate.
pub const SCHEMES: [&str; 2] = ["http", "https"];

fn construct(uri: &str) -> Result<Box<dyn ConfReader>> {
    Ok(Box::new(HttpReader::new(uri)?))
}

/// Register the `http` and `https` schemes.
pub fn register(registry: &mut Registry) -> Result<()> {
    for scheme in SCHEMES {
        registry.register(Scheme::new(scheme), construct)?;
    }
    Ok(())
}
