//! Access to ConfigMap and Secret data.
//!
//! [`ResourceBackend`] is the seam between the reader and the cluster.
//! [`KubeBackend`] talks to the API server through `kube`; tests substitute
//! an in-memory backend.

use crate::target::{K8sTarget, ResourceKind};
use async_trait::async_trait;
use confwire_core::{CancellationToken, Error, Result};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info, warn};

/// Service-account token mounted into pods.
pub const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

const CHANGE_QUEUE_DEPTH: usize = 16;

/// Resource data keyed by entry name.
pub type ResourceData = BTreeMap<String, Vec<u8>>;

/// A change observed by a resource watch.
#[derive(Debug)]
pub enum ResourceChange {
    /// The resource was created or updated
    Applied,
    /// The resource was deleted
    Deleted,
    /// The watch hit an error and keeps going
    Failed(Error),
}

/// Source of ConfigMap and Secret contents.
#[async_trait]
pub trait ResourceBackend: Send + Sync + 'static {
    /// Current data of the target resource.
    ///
    /// Fails with [`Error::NotFound`] when the resource does not exist.
    async fn fetch(&self, target: &K8sTarget) -> Result<ResourceData>;

    /// Start watching the target resource.
    ///
    /// Returns once the watch has completed its initial sync. The resource's
    /// existing state is reported as a first [`ResourceChange::Applied`]. The
    /// watch stops when `cancel` fires; the channel closing means it ended.
    async fn watch(
        &self,
        target: &K8sTarget,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ResourceChange>>;
}

/// How to authenticate against the cluster.
enum Credentials {
    InCluster,
    Kubeconfig(Box<Kubeconfig>),
}

impl Credentials {
    /// In-cluster token first, then `KUBECONFIG`, then `~/.kube/config`.
    fn resolve() -> Result<Self> {
        if Path::new(SERVICE_ACCOUNT_TOKEN).exists() {
            debug!("Using in-cluster service account credentials");
            return Ok(Credentials::InCluster);
        }

        let path = match std::env::var_os("KUBECONFIG") {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => dirs::home_dir()
                .ok_or_else(|| {
                    Error::invalid_config("kubeconfig", "no home directory to locate .kube/config")
                })?
                .join(".kube")
                .join("config"),
        };
        let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
            Error::invalid_config(
                "kubeconfig",
                format!("failed to load {}: {}", path.display(), e),
            )
        })?;
        debug!("Using kubeconfig at {}", path.display());
        Ok(Credentials::Kubeconfig(Box::new(kubeconfig)))
    }
}

/// Backend talking to the Kubernetes API server.
///
/// Credentials are located at construction; the client is created on first
/// use.
pub struct KubeBackend {
    credentials: Credentials,
    client: OnceCell<Client>,
}

impl KubeBackend {
    /// Locate credentials without contacting the cluster.
    pub fn new() -> Result<Self> {
        Ok(Self {
            credentials: Credentials::resolve()?,
            client: OnceCell::new(),
        })
    }

    async fn client(&self) -> Result<Client> {
        self.client
            .get_or_try_init(|| async {
                let config = match &self.credentials {
                    Credentials::InCluster => Config::incluster().map_err(|e| {
                        Error::Transport(format!("in-cluster configuration failed: {}", e))
                    })?,
                    Credentials::Kubeconfig(kubeconfig) => Config::from_custom_kubeconfig(
                        kubeconfig.as_ref().clone(),
                        &KubeConfigOptions::default(),
                    )
                    .await
                    .map_err(|e| Error::Transport(format!("kubeconfig rejected: {}", e)))?,
                };
                info!("Connecting to Kubernetes API at {}", config.cluster_url);
                Client::try_from(config)
                    .map_err(|e| Error::Transport(format!("Kubernetes client failed: {}", e)))
            })
            .await
            .cloned()
    }
}

fn api_error(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 404 => Error::NotFound(response.message),
        other => Error::Transport(format!("Kubernetes API error: {}", other)),
    }
}

fn configmap_data(configmap: ConfigMap) -> ResourceData {
    let mut data: ResourceData = configmap
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.into_bytes()))
        .collect();
    for (key, value) in configmap.binary_data.unwrap_or_default() {
        data.insert(key, value.0);
    }
    data
}

fn secret_data(secret: Secret) -> ResourceData {
    secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.0))
        .collect()
}

#[async_trait]
impl ResourceBackend for KubeBackend {
    async fn fetch(&self, target: &K8sTarget) -> Result<ResourceData> {
        let client = self.client().await?;
        let timeout = target.common.timeout;
        let missing = || Error::NotFound(target.describe());

        let lookup = async {
            match target.kind {
                ResourceKind::ConfigMap => {
                    let api: Api<ConfigMap> = Api::namespaced(client, &target.namespace);
                    let found = api.get_opt(&target.name).await.map_err(api_error)?;
                    found.map(configmap_data).ok_or_else(missing)
                }
                ResourceKind::Secret => {
                    let api: Api<Secret> = Api::namespaced(client, &target.namespace);
                    let found = api.get_opt(&target.name).await.map_err(api_error)?;
                    found.map(secret_data).ok_or_else(missing)
                }
            }
        };
        tokio::time::timeout(timeout, lookup)
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    async fn watch(
        &self,
        target: &K8sTarget,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ResourceChange>> {
        let client = self.client().await?;
        match target.kind {
            ResourceKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(client, &target.namespace);
                watch_named(api, target, cancel).await
            }
            ResourceKind::Secret => {
                let api: Api<Secret> = Api::namespaced(client, &target.namespace);
                watch_named(api, target, cancel).await
            }
        }
    }
}

/// Watch one named object through a reflector and wait for its cache to sync.
async fn watch_named<K>(
    api: Api<K>,
    target: &K8sTarget,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<ResourceChange>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let selector = format!("metadata.name={}", target.name);
    let config = watcher::Config::default().fields(&selector);
    let (store, writer) = reflector::store::<K>();
    let events = reflector::reflector(writer, watcher(api, config)).default_backoff();

    // Stopped on its own when the initial sync fails
    let session = cancel.child_token();
    let (tx, rx) = mpsc::channel(CHANGE_QUEUE_DEPTH);
    tokio::spawn(forward_changes(
        Box::pin(events),
        tx,
        session.clone(),
        target.describe(),
    ));

    let sync_timeout = target.common.timeout;
    match wait_for_sync(&store, sync_timeout, &cancel).await {
        Ok(()) => {
            info!("Watching {} (cache synced)", target.describe());
            Ok(rx)
        }
        Err(err) => {
            session.cancel();
            Err(err)
        }
    }
}

async fn wait_for_sync<K>(
    store: &Store<K>,
    sync_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        synced = tokio::time::timeout(sync_timeout, store.wait_until_ready()) => match synced {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::Watch("watch stopped before the cache synced".into())),
            Err(_) => Err(Error::Watch(format!(
                "cache did not sync within {:?}",
                sync_timeout
            ))),
        },
    }
}

async fn forward_changes<K, S>(
    mut events: S,
    tx: mpsc::Sender<ResourceChange>,
    session: CancellationToken,
    resource: String,
) where
    S: Stream<Item = std::result::Result<watcher::Event<K>, watcher::Error>> + Send + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = session.cancelled() => break,
            next = events.next() => next,
        };
        let change = match next {
            None => break,
            Some(Ok(watcher::Event::Apply(_))) | Some(Ok(watcher::Event::InitApply(_))) => {
                ResourceChange::Applied
            }
            Some(Ok(watcher::Event::Delete(_))) => ResourceChange::Deleted,
            Some(Ok(watcher::Event::Init)) | Some(Ok(watcher::Event::InitDone)) => continue,
            Some(Err(e)) => {
                warn!("Watch on {} failed: {}", resource, e);
                ResourceChange::Failed(Error::Watch(e.to_string()))
            }
        };
        if tx.send(change).await.is_err() {
            break;
        }
    }
    debug!("Stopped watching {}", resource);
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_configmap_merges_binary_data() {
        let configmap = ConfigMap {
            data: Some(BTreeMap::from([("app.yaml".to_string(), "a: 1".to_string())])),
            binary_data: Some(BTreeMap::from([(
                "blob".to_string(),
                ByteString(vec![0, 1, 2]),
            )])),
            ..Default::default()
        };
        let data = configmap_data(configmap);
        assert_eq!(data["app.yaml"], b"a: 1");
        assert_eq!(data["blob"], vec![0, 1, 2]);
    }

    #[test]
    fn test_secret_data_is_decoded_bytes() {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                "password".to_string(),
                ByteString(b"hunter2".to_vec()),
            )])),
            ..Default::default()
        };
        assert_eq!(secret_data(secret)["password"], b"hunter2");
    }

    #[test]
    fn test_empty_resources() {
        assert!(configmap_data(ConfigMap::default()).is_empty());
        assert!(secret_data(Secret::default()).is_empty());
    }
}
