//! Kubernetes ConfigMap and Secret reader for confwire.
//!
//! URIs take the form `k8s://<configmap|secret>/<namespace>/<name>[/<key>]`.
//! Without a key the resource must hold exactly one entry. Credentials come
//! from the in-cluster service account, then `KUBECONFIG`, then
//! `~/.kube/config`.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
mod reader;
pub mod target;

pub use backend::{KubeBackend, ResourceBackend, ResourceChange, ResourceData};
pub use reader::{K8sReader, SETTLE_DELAY};
pub use target::{resolve_value, K8sTarget, ResourceKind};

use confwire_core::{ConfReader, Registry, Result, Scheme};

/// URI scheme handled by this crate.
pub const SCHEME: &str = "k8s";

fn construct(uri: &str) -> Result<Box<dyn ConfReader>> {
    Ok(Box::new(K8sReader::new(uri)?))
}

/// Register the `k8s` scheme.
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register(Scheme::new(SCHEME), construct)
}
