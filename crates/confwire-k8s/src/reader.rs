//! Kubernetes reader.

use crate::backend::{KubeBackend, ResourceBackend, ResourceChange};
use crate::target::{resolve_value, K8sTarget};
use async_trait::async_trait;
use confwire_core::{
    expect_scheme, parse_uri, retry_fixed, CancellationToken, ConfReader, Error, EventSink,
    ReadEvent, ReaderState, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Pause after a change before re-reading the resource.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Reads a value from a ConfigMap or Secret and follows it through a watch.
pub struct K8sReader {
    state: Arc<ReaderState>,
    target: Arc<K8sTarget>,
    backend: Arc<dyn ResourceBackend>,
}

impl K8sReader {
    /// Build a reader for a `k8s://` URI using the ambient cluster
    /// credentials.
    pub fn new(uri: &str) -> Result<Self> {
        let target = parse_target(uri)?;
        let backend = KubeBackend::new()?;
        Ok(Self::from_parts(uri, target, Arc::new(backend)))
    }

    /// Build a reader over a custom backend.
    pub fn with_backend(uri: &str, backend: Arc<dyn ResourceBackend>) -> Result<Self> {
        let target = parse_target(uri)?;
        Ok(Self::from_parts(uri, target, backend))
    }

    fn from_parts(uri: &str, target: K8sTarget, backend: Arc<dyn ResourceBackend>) -> Self {
        debug!(
            "Created Kubernetes reader for {} (key {:?})",
            target.describe(),
            target.key
        );
        Self {
            state: ReaderState::new(uri),
            target: Arc::new(target),
            backend,
        }
    }

    /// Parsed target.
    pub fn target(&self) -> &K8sTarget {
        &self.target
    }
}

fn parse_target(uri: &str) -> Result<K8sTarget> {
    let parsed = parse_uri(uri)?;
    expect_scheme(&parsed, &["k8s"])?;
    K8sTarget::from_url(&parsed)
}

async fn fetch_value(backend: &dyn ResourceBackend, target: &K8sTarget) -> Result<Vec<u8>> {
    let data = backend.fetch(target).await?;
    resolve_value(&target.describe(), &data, target.key.as_deref())
}

#[async_trait]
impl ConfReader for K8sReader {
    fn uri(&self) -> &str {
        self.state.uri()
    }

    async fn read(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.state
            .until_closed(retry_fixed(
                &self.target.common.retry,
                cancel,
                "Kubernetes read",
                || fetch_value(self.backend.as_ref(), &self.target),
            ))
            .await
    }

    async fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<ReadEvent>> {
        let (sink, events) = self.state.begin_subscription(cancel)?;

        let changes = tokio::select! {
            biased;
            _ = sink.cancelled() => return Err(Error::Cancelled),
            changes = self.backend.watch(&self.target, sink.token()) => changes?,
        };

        tokio::spawn(follow_resource(
            self.backend.clone(),
            self.target.clone(),
            changes,
            sink,
        ));
        Ok(events)
    }

    async fn close(&self) -> Result<()> {
        self.state.close();
        Ok(())
    }
}

/// Subscription task: one re-read per applied change, an error per deletion.
async fn follow_resource(
    backend: Arc<dyn ResourceBackend>,
    target: Arc<K8sTarget>,
    mut changes: mpsc::Receiver<ResourceChange>,
    sink: EventSink,
) {
    loop {
        let change = tokio::select! {
            biased;
            _ = sink.cancelled() => break,
            change = changes.recv() => change,
        };

        let delivered = match change {
            None => {
                info!("Watch on {} ended", target.describe());
                sink.emit_error(Error::StreamClosed("resource watch ended".into()))
                    .await;
                break;
            }
            Some(ResourceChange::Applied) => {
                if !sink.pause(SETTLE_DELAY).await {
                    break;
                }
                let current = tokio::select! {
                    biased;
                    _ = sink.cancelled() => break,
                    current = fetch_value(backend.as_ref(), &target) => current,
                };
                sink.emit(current).await
            }
            Some(ResourceChange::Deleted) => {
                sink.emit_error(Error::NotFound(format!("{} was deleted", target.describe())))
                    .await
            }
            Some(ResourceChange::Failed(err)) => sink.emit_error(err).await,
        };
        if !delivered {
            break;
        }
    }
    debug!("Stopped following {}", target.describe());
}
