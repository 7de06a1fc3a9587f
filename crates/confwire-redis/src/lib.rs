//! Redis reader for confwire.
//!
//! `redis[s]://[user[:pass]@]host[:port]/<key>[?query][#field]` reads a
//! string key with GET, or a hash field with HGET when a fragment is given.
//! Subscriptions enable keyspace notifications on the server if needed,
//! pattern-subscribe to the key's keyspace channel and re-read the value on
//! every notification.
//!
//! Recognized query parameters: `db`, `timeout`, `retry_attempts` (alias
//! `max_retries`), `retry_delay`, `pool_size`, `min_idle_conns`,
//! `tls_insecure`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
mod reader;

pub use config::{escape_glob, patch_notify_flags, RedisConfig};
pub use reader::RedisReader;

use confwire_core::{ConfReader, Registry, Result, Scheme};

/// Schemes handled by this crate.
pub const SCHEMES: [&str; 2] = ["redis", "rediss"];

fn construct(uri: &str) -> Result<Box<dyn ConfReader>> {
    Ok(Box::new(RedisReader::new(uri)?))
}

/// Register the `redis` and `rediss` schemes.
pub fn register(registry: &mut Registry) -> Result<()> {
    for scheme in SCHEMES {
        registry.register(Scheme::new(scheme), construct)?;
    }
    Ok(())
}
