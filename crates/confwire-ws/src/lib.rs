//! WebSocket reader for confwire.
//!
//! Every text or binary message on the socket is one configuration payload.
//! Subscriptions keep the connection alive with pings, treat a missed pong
//! deadline or an abnormal close as an error, and redial after
//! `retry_delay`.
//!
//! Recognized query parameters: `timeout`, `retry_attempts`, `retry_delay`,
//! `ping_interval`, `pong_wait`, `write_wait`, `header_<Name>`,
//! `tls_insecure`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
mod reader;
mod tls;

pub use config::{WsConfig, DEFAULT_PING_INTERVAL, DEFAULT_PONG_WAIT, DEFAULT_WRITE_WAIT};
pub use reader::WsReader;

use confwire_core::{ConfReader, Registry, Result, Scheme};

/// Schemes handled by this crate.
pub const SCHEMES: [&str; 2] = ["ws", "wss"];

fn construct(uri: &str) -> Result<Box<dyn ConfReader>> {
    Ok(Box::new(WsReader::new(uri)?))
}

/// Register the `ws` and `wss` schemes.
pub fn register(registry: &mut Registry) -> Result<()> {
    for scheme in SCHEMES {
        registry.register(Scheme::new(scheme), construct)?;
    }
    Ok(())
}
