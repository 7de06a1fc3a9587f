//! Redis reader built on keyspace notifications.

use crate::config::{patch_notify_flags, RedisConfig};
use async_trait::async_trait;
use confwire_core::{
    expect_scheme, parse_uri, retry_fixed, CancellationToken, ConfReader, Error, EventSink,
    ReadEvent, ReaderState, Result,
};
use futures::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ErrorKind, RedisError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info, warn};

const NOTIFY_PARAMETER: &str = "notify-keyspace-events";

type Notifications = Pin<Box<dyn Stream<Item = redis::Msg> + Send>>;

/// Reads a string key or hash field from Redis and follows it through
/// keyspace notifications.
pub struct RedisReader {
    state: Arc<ReaderState>,
    inner: Arc<Inner>,
}

/// Connection state shared with the subscription task.
struct Inner {
    config: RedisConfig,
    client: Client,
    manager: OnceCell<ConnectionManager>,
}

impl RedisReader {
    /// Build a reader for a `redis://` or `rediss://` URI.
    ///
    /// No connection is made until the first operation.
    pub fn new(uri: &str) -> Result<Self> {
        let parsed = parse_uri(uri)?;
        expect_scheme(&parsed, &["redis", "rediss"])?;
        let config = RedisConfig::from_url(&parsed)?;
        let client = Client::open(config.connection_url())
            .map_err(|e| Error::invalid_uri(uri, e.to_string()))?;

        if config.pool_size > 1 || config.min_idle_conns > 1 {
            debug!(
                "pool_size={} min_idle_conns={} requested; reads share one multiplexed connection",
                config.pool_size, config.min_idle_conns
            );
        }
        debug!(
            "Created Redis reader for {} on {}:{} db {}",
            config.target(),
            config.host,
            config.port,
            config.db
        );
        Ok(Self {
            state: ReaderState::new(uri),
            inner: Arc::new(Inner {
                config,
                client,
                manager: OnceCell::new(),
            }),
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.inner.config
    }
}

fn redis_error(err: RedisError) -> Error {
    if err.is_timeout() {
        Error::Transport(format!("Redis timed out: {}", err))
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        Error::Transport(format!("Redis connection failed: {}", err))
    } else {
        match err.kind() {
            ErrorKind::ResponseError
            | ErrorKind::TypeError
            | ErrorKind::AuthenticationFailed
            | ErrorKind::ExtensionError
            | ErrorKind::NoScriptError
            | ErrorKind::InvalidClientConfig => Error::Rejected(format!("Redis: {}", err)),
            _ => Error::Protocol(format!("Redis error: {}", err)),
        }
    }
}

impl Inner {
    /// Bound a Redis operation by the configured timeout.
    async fn bounded<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, RedisError>>,
    {
        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, operation).await {
            Ok(outcome) => outcome.map_err(redis_error),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                info!(
                    "Connecting to Redis at {}:{}",
                    self.config.host, self.config.port
                );
                self.bounded(ConnectionManager::new(self.client.clone())).await
            })
            .await?;
        Ok(manager.clone())
    }

    /// Single GET or HGET.
    async fn fetch(&self) -> Result<Vec<u8>> {
        let mut conn = self.connection().await?;
        let key = self.config.key.as_str();
        let value: Option<Vec<u8>> = match &self.config.field {
            Some(field) => self.bounded(conn.hget(key, field.as_str())).await?,
            None => self.bounded(conn.get(key)).await?,
        };
        value.ok_or_else(|| Error::NotFound(self.config.target()))
    }

    /// Add the notification flags the watch needs, never removing any.
    async fn ensure_notifications(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let reply: Vec<String> = self
            .bounded(
                redis::cmd("CONFIG")
                    .arg("GET")
                    .arg(NOTIFY_PARAMETER)
                    .query_async(&mut conn),
            )
            .await?;
        let current = reply.get(1).map(String::as_str).unwrap_or_default();

        match patch_notify_flags(current, self.config.field.is_some()) {
            None => {
                debug!("Keyspace notifications already enabled ({})", current);
                Ok(())
            }
            Some(flags) => {
                info!(
                    "Setting {} from '{}' to '{}'",
                    NOTIFY_PARAMETER, current, flags
                );
                let _: () = self
                    .bounded(
                        redis::cmd("CONFIG")
                            .arg("SET")
                            .arg(NOTIFY_PARAMETER)
                            .arg(&flags)
                            .query_async(&mut conn),
                    )
                    .await?;
                Ok(())
            }
        }
    }

    /// Open a pubsub connection subscribed to the key's keyspace channel.
    async fn notifications(&self) -> Result<Notifications> {
        let mut pubsub = self.bounded(self.client.get_async_pubsub()).await?;
        let pattern = self.config.keyspace_pattern();
        self.bounded(pubsub.psubscribe(&pattern)).await?;
        info!("Subscribed to {}", pattern);
        Ok(Box::pin(pubsub.into_on_message()))
    }

    /// Enable notifications and subscribe to them.
    async fn watch_stream(&self) -> Result<Notifications> {
        self.ensure_notifications().await?;
        self.notifications().await
    }
}

#[async_trait]
impl ConfReader for RedisReader {
    fn uri(&self) -> &str {
        self.state.uri()
    }

    async fn read(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.state
            .until_closed(retry_fixed(
                &self.inner.config.common.retry,
                cancel,
                "Redis read",
                || self.inner.fetch(),
            ))
            .await
    }

    async fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<ReadEvent>> {
        let (sink, events) = self.state.begin_subscription(cancel)?;

        let notifications = tokio::select! {
            biased;
            _ = sink.cancelled() => return Err(Error::Cancelled),
            notifications = self.inner.watch_stream() => notifications?,
        };

        tokio::spawn(watch_key(self.inner.clone(), notifications, sink));
        Ok(events)
    }

    async fn close(&self) -> Result<()> {
        self.state.close();
        Ok(())
    }
}

/// Subscription task: the current value first, then a fresh read per
/// notification. Notifications carry no payload. A lost pubsub connection
/// is re-established and followed by a read, so a change made while
/// disconnected is still delivered.
async fn watch_key(inner: Arc<Inner>, mut notifications: Notifications, sink: EventSink) {
    let initial = tokio::select! {
        biased;
        _ = sink.cancelled() => return,
        initial = inner.fetch() => initial,
    };
    if !sink.emit(initial).await {
        return;
    }

    loop {
        let notification = tokio::select! {
            biased;
            _ = sink.cancelled() => break,
            notification = notifications.next() => notification,
        };

        match notification {
            Some(message) => debug!(
                "Keyspace event '{}' on {}",
                message.get_payload::<String>().unwrap_or_default(),
                message.get_channel_name()
            ),
            None => {
                warn!(
                    "Keyspace notification stream for {} ended, resubscribing",
                    inner.config.target()
                );
                if !sink
                    .emit_error(Error::StreamClosed(
                        "keyspace notification stream ended".into(),
                    ))
                    .await
                {
                    break;
                }
                match resubscribe(&inner, &sink).await {
                    Some(stream) => notifications = stream,
                    None => break,
                }
            }
        }

        let current = tokio::select! {
            biased;
            _ = sink.cancelled() => break,
            current = inner.fetch() => current,
        };
        if !sink.emit(current).await {
            break;
        }
    }
    debug!("Stopped watching {}", inner.config.target());
}

/// Retry the notification setup every `retry_delay` until it succeeds.
///
/// Returns `None` once the subscription is over.
async fn resubscribe(inner: &Inner, sink: &EventSink) -> Option<Notifications> {
    let delay = inner.config.common.retry.delay;
    loop {
        if !sink.pause(delay).await {
            return None;
        }
        let outcome = tokio::select! {
            biased;
            _ = sink.cancelled() => return None,
            outcome = inner.watch_stream() => outcome,
        };
        match outcome {
            Ok(stream) => {
                info!("Resubscribed to notifications for {}", inner.config.target());
                return Some(stream);
            }
            Err(e) => {
                warn!("Resubscribing for {} failed: {}", inner.config.target(), e);
                if !sink.emit_error(e).await {
                    return None;
                }
            }
        }
    }
}
