//! Local file reader for confwire.
//!
//! Handles `file://` URIs and bare paths. Subscriptions watch the exact path
//! with the platform's native notification backend (via `notify`) and emit
//! one event per settled change.

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod reader;

pub use reader::{FileReader, SETTLE_DELAY};

use confwire_core::{ConfReader, Registry, Result, Scheme};

/// URI scheme handled by this crate, in addition to bare paths.
pub const SCHEME: &str = "file";

fn construct(uri: &str) -> Result<Box<dyn ConfReader>> {
    Ok(Box::new(FileReader::new(uri)?))
}

/// Register the `file` scheme and the bare-path scheme.
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Scheme::new(SCHEME), construct)?;
    registry.register(Scheme::local(), construct)
}
