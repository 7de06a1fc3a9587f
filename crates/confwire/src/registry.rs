//! The process-wide registry of enabled transports.

use confwire_core::{ConfReader, Registry, Result};
use std::sync::OnceLock;
use tracing::{debug, error};

static DEFAULT_REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Registry holding the schemes of every enabled transport.
///
/// Built on first use and immutable afterwards.
pub fn default_registry() -> &'static Registry {
    DEFAULT_REGISTRY.get_or_init(build)
}

/// Open a reader for `uri` through the default registry.
pub fn open(uri: &str) -> Result<Box<dyn ConfReader>> {
    default_registry().open(uri)
}

fn build() -> Registry {
    #[allow(unused_mut)]
    let mut registry = Registry::new();

    #[cfg(feature = "file")]
    report("file", confwire_file::register(&mut registry));
    #[cfg(feature = "http")]
    report("http", confwire_http::register(&mut registry));
    #[cfg(feature = "ws")]
    report("ws", confwire_ws::register(&mut registry));
    #[cfg(feature = "redis")]
    report("redis", confwire_redis::register(&mut registry));
    #[cfg(feature = "k8s")]
    report("k8s", confwire_k8s::register(&mut registry));

    debug!("Default registry schemes: {:?}", registry.schemes());
    registry
}

#[allow(dead_code)]
fn report(transport: &str, outcome: Result<()>) {
    if let Err(e) = outcome {
        error!("Failed to register {} transport: {}", transport, e);
    }
}
