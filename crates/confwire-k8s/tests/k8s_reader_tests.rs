//! Kubernetes reader behaviour against an in-memory backend.

use async_trait::async_trait;
use confwire_core::{CancellationToken, ConfReader, Error, ReadEvent, Result};
use confwire_k8s::{K8sReader, K8sTarget, ResourceBackend, ResourceChange, ResourceData};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Backend serving data from memory with a controllable change feed.
#[derive(Default)]
struct FakeBackend {
    data: Mutex<Option<ResourceData>>,
    changes: Mutex<Option<mpsc::Sender<ResourceChange>>>,
    fetches: Mutex<usize>,
    fail_sync: bool,
}

impl FakeBackend {
    fn with(pairs: &[(&str, &str)]) -> Arc<Self> {
        let backend = Self::default();
        backend.set(pairs);
        Arc::new(backend)
    }

    fn set(&self, pairs: &[(&str, &str)]) {
        let data = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect();
        *self.data.lock() = Some(data);
    }

    async fn send(&self, change: ResourceChange) {
        let tx = self.changes.lock().clone().expect("watch not started");
        tx.send(change).await.expect("watch dropped");
    }

    fn end_watch(&self) {
        self.changes.lock().take();
    }
}

#[async_trait]
impl ResourceBackend for FakeBackend {
    async fn fetch(&self, target: &K8sTarget) -> Result<ResourceData> {
        *self.fetches.lock() += 1;
        self.data
            .lock()
            .clone()
            .ok_or_else(|| Error::NotFound(target.describe()))
    }

    async fn watch(
        &self,
        _target: &K8sTarget,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ResourceChange>> {
        if self.fail_sync {
            return Err(Error::Watch("cache did not sync".into()));
        }
        let (tx, rx) = mpsc::channel(8);
        // The initial state, as a synced informer reports it
        let exists = self.data.lock().is_some();
        if exists {
            tx.send(ResourceChange::Applied)
                .await
                .map_err(|e| Error::Watch(e.to_string()))?;
        }
        *self.changes.lock() = Some(tx);
        Ok(rx)
    }
}

fn reader(uri: &str, backend: Arc<FakeBackend>) -> K8sReader {
    K8sReader::with_backend(uri, backend).unwrap()
}

async fn next_event(events: &mut mpsc::Receiver<ReadEvent>) -> ReadEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event queue closed")
}

/// Test a single-entry resource is read without naming the key
#[tokio::test]
async fn test_read_single_entry() {
    let reader = reader("k8s://configmap/default/app", FakeBackend::with(&[("a", "x")]));
    let data = reader.read(&CancellationToken::new()).await.unwrap();
    assert_eq!(data, b"x");
}

/// Test several entries without a key is an error listing the keys
#[tokio::test]
async fn test_read_ambiguous_resource() {
    let reader = reader(
        "k8s://configmap/default/app",
        FakeBackend::with(&[("a", "x"), ("b", "y")]),
    );
    let err = reader.read(&CancellationToken::new()).await.unwrap_err();
    match err {
        Error::Ambiguous { resource, keys } => {
            assert_eq!(resource, "configmap default/app");
            assert_eq!(keys, vec!["a", "b"]);
        }
        other => panic!("Expected Ambiguous, got: {:?}", other),
    }
}

/// Test a key in the URI selects that entry
#[tokio::test]
async fn test_read_selected_key() {
    let reader = reader(
        "k8s://secret/default/app/b",
        FakeBackend::with(&[("a", "x"), ("b", "y")]),
    );
    assert_eq!(reader.read(&CancellationToken::new()).await.unwrap(), b"y");
}

/// Test missing resources and keys are not retried
#[tokio::test]
async fn test_read_missing_is_not_found() {
    let backend = Arc::new(FakeBackend::default());
    let reader = reader("k8s://configmap/default/absent", backend.clone());
    let err = reader.read(&CancellationToken::new()).await.unwrap_err();
    assert!(err.is_not_found(), "{:?}", err);
    assert_eq!(*backend.fetches.lock(), 1);

    let reader = reader_for_key();
    let err = reader.read(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(ref m) if m.contains("'missing'")), "{:?}", err);
}

fn reader_for_key() -> K8sReader {
    reader(
        "k8s://configmap/default/app/missing",
        FakeBackend::with(&[("a", "x")]),
    )
}

/// Test the subscription reports the initial state then each update
#[tokio::test]
async fn test_subscribe_initial_and_updates() {
    let backend = FakeBackend::with(&[("config.yaml", "v: 1")]);
    let reader = reader("k8s://configmap/default/app", backend.clone());
    let mut events = reader.subscribe(CancellationToken::new()).await.unwrap();

    let first = next_event(&mut events).await;
    assert!(first.is_valid());
    assert_eq!(first.data, b"v: 1");
    assert_eq!(first.source_uri, "k8s://configmap/default/app");

    backend.set(&[("config.yaml", "v: 2")]);
    backend.send(ResourceChange::Applied).await;
    assert_eq!(next_event(&mut events).await.data, b"v: 2");

    reader.close().await.unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap();
    assert!(closed.is_none());
}

/// Test deletion and watch failures arrive as error events
#[tokio::test]
async fn test_subscribe_delete_and_failure() {
    let backend = FakeBackend::with(&[("a", "x")]);
    let reader = reader("k8s://configmap/default/app", backend.clone());
    let mut events = reader.subscribe(CancellationToken::new()).await.unwrap();
    assert_eq!(next_event(&mut events).await.data, b"x");

    backend.send(ResourceChange::Deleted).await;
    let deleted = next_event(&mut events).await;
    assert!(!deleted.is_valid());
    assert!(matches!(deleted.error, Some(Error::NotFound(ref m)) if m.contains("deleted")));

    backend
        .send(ResourceChange::Failed(Error::Watch("relist".into())))
        .await;
    assert!(matches!(
        next_event(&mut events).await.error,
        Some(Error::Watch(_))
    ));
}

/// Test an ended watch reports it and closes the queue
#[tokio::test]
async fn test_subscribe_watch_end() {
    let backend = FakeBackend::with(&[("a", "x")]);
    let reader = reader("k8s://configmap/default/app", backend.clone());
    let mut events = reader.subscribe(CancellationToken::new()).await.unwrap();
    assert_eq!(next_event(&mut events).await.data, b"x");

    backend.end_watch();
    assert!(matches!(
        next_event(&mut events).await.error,
        Some(Error::StreamClosed(_))
    ));
    assert!(events.recv().await.is_none());
    assert!(reader.subscribe(CancellationToken::new()).await.is_ok());
}

/// Test a failed initial sync fails the subscribe call and frees the slot
#[tokio::test]
async fn test_subscribe_sync_failure() {
    let backend = Arc::new(FakeBackend {
        fail_sync: true,
        ..Default::default()
    });
    let reader = reader("k8s://configmap/default/app", backend);
    let err = reader.subscribe(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Watch(_)));
    let err = reader.subscribe(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Watch(_)), "slot should be free: {:?}", err);
}

/// Test a second concurrent subscription is rejected
#[tokio::test]
async fn test_single_subscription() {
    let reader = reader("k8s://configmap/default/app", FakeBackend::with(&[("a", "x")]));
    let _events = reader.subscribe(CancellationToken::new()).await.unwrap();
    let err = reader.subscribe(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::AlreadySubscribed));
}

/// Test a closed reader refuses work
#[tokio::test]
async fn test_closed_reader() {
    let reader = reader("k8s://configmap/default/app", FakeBackend::with(&[("a", "x")]));
    reader.close().await.unwrap();
    reader.close().await.unwrap();
    assert!(matches!(
        reader.read(&CancellationToken::new()).await,
        Err(Error::Closed)
    ));
    assert!(matches!(
        reader.subscribe(CancellationToken::new()).await,
        Err(Error::Closed)
    ));
}

/// Test malformed URIs fail at construction
#[test]
fn test_construction_errors() {
    let backend = || -> Arc<dyn ResourceBackend> { FakeBackend::with(&[]) };
    assert!(matches!(
        K8sReader::with_backend("k8s://pod/default/app", backend()),
        Err(Error::InvalidUri { .. })
    ));
    assert!(matches!(
        K8sReader::with_backend("http://example.com/a", backend()),
        Err(Error::UnsupportedScheme(_))
    ));
}
