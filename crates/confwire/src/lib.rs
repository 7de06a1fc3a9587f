//! # confwire
//!
//! Load typed configuration from files, HTTP(S), WebSocket, Redis and
//! Kubernetes, and follow it as it changes.
//!
//! ```no_run
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Settings {
//!     port: u16,
//! }
//!
//! # async fn run() -> Result<(), confwire::LoadError> {
//! let loader = confwire::ConfLoader::<Settings>::new("file:///etc/app/settings.yaml")?;
//! let settings = loader.load().await?;
//! println!("listening on {}", settings.port);
//! # Ok(())
//! # }
//! ```
//!
//! Payloads may be JSON, YAML, TOML, XML or INI. Decoded values map onto
//! the destination type leniently, so `"8080"` fills a `u16` field.
//!
//! Each transport lives in its own crate and is enabled by the cargo feature
//! of the same name (`file`, `http`, `ws`, `redis`, `k8s`).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod env;
pub mod error;
pub mod format;
mod loader;
mod mapping;
mod registry;

pub use env::expand_env;
pub use error::LoadError;
pub use format::{decode, Format, CONTENT_TYPE_PARAM};
pub use loader::{ConfEvent, ConfLoader};
pub use registry::{default_registry, open};

pub use confwire_core::{
    CancellationToken, ConfReader, Error, ReadEvent, Registry, Result, Scheme,
};

#[cfg(feature = "file")]
pub use confwire_file as file;
#[cfg(feature = "http")]
pub use confwire_http as http;
#[cfg(feature = "k8s")]
pub use confwire_k8s as k8s;
#[cfg(feature = "redis")]
pub use confwire_redis as redis;
#[cfg(feature = "ws")]
pub use confwire_ws as ws;
