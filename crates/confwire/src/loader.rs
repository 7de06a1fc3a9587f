//! Typed loading and change subscriptions.

use crate::env::expand_env;
use crate::error::LoadError;
use crate::format::{decode, Format};
use crate::mapping::from_tree;
use crate::registry::default_registry;
use chrono::{DateTime, Utc};
use confwire_core::{CancellationToken, ConfReader, ReadEvent, Registry};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One typed configuration update.
#[derive(Debug)]
pub struct ConfEvent<T> {
    /// URI of the source
    pub source_uri: String,
    /// When the underlying read happened
    pub timestamp: DateTime<Utc>,
    /// Why no configuration could be produced
    pub error: Option<LoadError>,
    /// The decoded configuration
    pub config: Option<T>,
}

impl<T> ConfEvent<T> {
    /// True iff there is a configuration and no error.
    pub fn is_valid(&self) -> bool {
        self.error.is_none() && self.config.is_some()
    }

    /// Consume the event, returning the configuration or the error.
    pub fn into_result(self) -> Result<T, LoadError> {
        match (self.error, self.config) {
            (Some(err), _) => Err(err),
            (None, Some(config)) => Ok(config),
            (None, None) => Err(LoadError::Empty),
        }
    }
}

/// How payloads become typed values.
#[derive(Debug, Clone, Copy)]
struct Decoding {
    format: Format,
    expand_env: bool,
}

impl Decoding {
    fn parse<T: DeserializeOwned>(self, data: &[u8]) -> Result<T, LoadError> {
        let mut tree = decode(self.format, data)?;
        if self.expand_env {
            expand_env(&mut tree);
        }
        from_tree(tree).map_err(LoadError::Mapping)
    }
}

/// Loads configuration of type `T` from a URI and follows its changes.
///
/// The payload format is taken from the URI path extension or its
/// `content-type` query parameter. String values have `${VAR}` and
/// `${VAR:-default}` replaced from the environment unless disabled with
/// [`with_env_expansion`](Self::with_env_expansion).
pub struct ConfLoader<T> {
    uri: String,
    decoding: Decoding,
    reader: Box<dyn ConfReader>,
    _config: PhantomData<fn() -> T>,
}

impl<T> ConfLoader<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Create a loader resolved through the default registry.
    pub fn new(uri: &str) -> Result<Self, LoadError> {
        Self::with_registry(default_registry(), uri)
    }

    /// Create a loader resolved through a custom registry.
    pub fn with_registry(registry: &Registry, uri: &str) -> Result<Self, LoadError> {
        let format = Format::detect(uri)?;
        let reader = registry.open(uri)?;
        debug!("Loading {} as {}", uri, format);
        Ok(Self {
            uri: uri.to_string(),
            decoding: Decoding {
                format,
                expand_env: true,
            },
            reader,
            _config: PhantomData,
        })
    }

    /// Turn environment substitution in string values on or off.
    pub fn with_env_expansion(mut self, enabled: bool) -> Self {
        self.decoding.expand_env = enabled;
        self
    }

    /// Source URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Detected payload format.
    pub fn format(&self) -> Format {
        self.decoding.format
    }

    /// Read and decode the current configuration.
    pub async fn load(&self) -> Result<T, LoadError> {
        self.load_with(&CancellationToken::new()).await
    }

    /// Like [`load`](Self::load), observing `cancel`.
    pub async fn load_with(&self, cancel: &CancellationToken) -> Result<T, LoadError> {
        let data = self.reader.read(cancel).await?;
        self.decoding.parse(&data)
    }

    /// Load the current configuration, then follow its changes.
    ///
    /// The first event carries the initially loaded value. Each reader event
    /// follows as one typed event; decode and mapping failures arrive as
    /// error events. The queue closes when the reader's subscription ends.
    pub async fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ConfEvent<T>>, LoadError> {
        let initial = self.load_with(&cancel).await?;
        let raw = self.reader.subscribe(cancel.clone()).await?;

        let (tx, rx) = mpsc::channel(1);
        let first = ConfEvent {
            source_uri: self.uri.clone(),
            timestamp: Utc::now(),
            error: None,
            config: Some(initial),
        };
        // Cannot fail: the queue is empty and the receiver is alive
        let _ = tx.try_send(first);

        tokio::spawn(translate(raw, tx, self.decoding, cancel));
        Ok(rx)
    }

    /// Close the underlying reader.
    pub async fn close(&self) -> Result<(), LoadError> {
        self.reader.close().await?;
        Ok(())
    }
}

async fn translate<T>(
    mut raw: mpsc::Receiver<ReadEvent>,
    tx: mpsc::Sender<ConfEvent<T>>,
    decoding: Decoding,
    cancel: CancellationToken,
) where
    T: DeserializeOwned + Send + 'static,
{
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = raw.recv() => event,
        };
        let Some(event) = event else { break };

        let ReadEvent {
            source_uri,
            timestamp,
            data,
            error,
        } = event;
        let outcome = match error {
            Some(err) => Err(LoadError::Reader(err)),
            None => decoding.parse::<T>(&data),
        };
        if let Err(err) = &outcome {
            warn!("Configuration update from {} rejected: {}", source_uri, err);
        }

        let (config, error) = match outcome {
            Ok(config) => (Some(config), None),
            Err(err) => (None, Some(err)),
        };
        let typed = ConfEvent {
            source_uri,
            timestamp,
            error,
            config,
        };
        if tx.send(typed).await.is_err() {
            break;
        }
    }
    debug!("Typed subscription ended");
}
