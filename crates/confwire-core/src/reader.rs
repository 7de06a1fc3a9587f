//! The reader contract and the state every reader shares.
//!
//! A reader owns one client handle plus a small amount of guarded state: a
//! `closed` flag and a "subscription in progress" marker. [`ReaderState`]
//! holds both under one lock, and [`EventSink`] is the producer side of the
//! delivery queue handed to a subscription task.

use crate::{
    error::{Error, Result},
    event::ReadEvent,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Capacity of every delivery queue.
pub const EVENT_QUEUE_DEPTH: usize = 1;

/// One-shot read, change subscription and teardown for one transport.
#[async_trait]
pub trait ConfReader: Send + Sync {
    /// URI this reader was built from.
    fn uri(&self) -> &str;

    /// Fetch the current content once.
    async fn read(&self, cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// Start watching for changes.
    ///
    /// Returns once the watch is established. Events arrive on the returned
    /// queue until `cancel` fires, the reader is closed, or the watch ends
    /// permanently. Only one subscription may be active per reader.
    async fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<ReadEvent>>;

    /// Release the reader. Safe to call repeatedly and concurrently.
    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct Flags {
    closed: bool,
    subscribed: bool,
}

/// Lifecycle state shared by a reader and its subscription task.
#[derive(Debug)]
pub struct ReaderState {
    uri: String,
    flags: RwLock<Flags>,
    shutdown: CancellationToken,
}

impl ReaderState {
    /// Fresh, open state for a reader of `uri`.
    pub fn new(uri: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            uri: uri.into(),
            flags: RwLock::new(Flags::default()),
            shutdown: CancellationToken::new(),
        })
    }

    /// URI of the owning reader.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Fail with [`Error::Closed`] once the reader is closed.
    pub fn ensure_open(&self) -> Result<()> {
        if self.flags.read().closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.flags.read().closed
    }

    /// Whether a subscription currently holds the slot.
    pub fn is_subscribed(&self) -> bool {
        self.flags.read().subscribed
    }

    /// Token cancelled when the reader closes.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run a one-shot operation, aborting it with [`Error::Closed`] if the
    /// reader is closed first.
    pub async fn until_closed<T, F>(&self, operation: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.ensure_open()?;
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::Closed),
            outcome = operation => outcome,
        }
    }

    /// Mark the reader closed and stop any active subscription.
    ///
    /// Returns `true` for the call that actually closed it.
    pub fn close(&self) -> bool {
        {
            let mut flags = self.flags.write();
            if flags.closed {
                return false;
            }
            flags.closed = true;
        }
        self.shutdown.cancel();
        debug!("Closed reader for {}", self.uri);
        true
    }

    /// Claim the subscription slot and create its delivery queue.
    ///
    /// Fails with [`Error::Closed`] or [`Error::AlreadySubscribed`]. The slot
    /// is released when the returned sink is dropped, so a failed setup only
    /// needs to drop it.
    pub fn begin_subscription(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<(EventSink, mpsc::Receiver<ReadEvent>)> {
        {
            let mut flags = self.flags.write();
            if flags.closed {
                return Err(Error::Closed);
            }
            if flags.subscribed {
                return Err(Error::AlreadySubscribed);
            }
            flags.subscribed = true;
        }

        let token = self.shutdown.child_token();
        let link = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => link.cancel(),
                _ = link.cancelled() => {}
            }
        });

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        debug!("Subscription started for {}", self.uri);
        Ok((
            EventSink {
                state: Arc::clone(self),
                tx,
                token,
            },
            rx,
        ))
    }

    fn release_subscription(&self) {
        self.flags.write().subscribed = false;
    }
}

/// Producer side of a delivery queue.
///
/// Cancelled when either the caller's token fires or the reader closes.
/// Dropping the sink closes the queue and frees the subscription slot.
#[derive(Debug)]
pub struct EventSink {
    state: Arc<ReaderState>,
    tx: mpsc::Sender<ReadEvent>,
    token: CancellationToken,
}

impl EventSink {
    /// Source URI stamped on every event.
    pub fn uri(&self) -> &str {
        &self.state.uri
    }

    /// Combined cancellation token for helper tasks of this subscription.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once the subscription should stop: the caller or the
    /// reader cancelled it, or the receiver was dropped.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    /// Whether the subscription should stop.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.tx.is_closed()
    }

    /// Deliver the outcome of a fetch.
    ///
    /// Returns `false` when the subscription is over (cancelled or the
    /// receiver is gone) and the producer should exit.
    pub async fn emit(&self, result: Result<Vec<u8>>) -> bool {
        let event = ReadEvent::new(self.uri(), result);
        if let Some(err) = &event.error {
            debug!("Emitting error event for {}: {}", self.uri(), err);
        } else {
            trace!("Emitting {} bytes for {}", event.data.len(), self.uri());
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    /// Deliver a payload.
    pub async fn emit_data(&self, data: Vec<u8>) -> bool {
        self.emit(Ok(data)).await
    }

    /// Deliver an error.
    pub async fn emit_error(&self, error: Error) -> bool {
        self.emit(Err(error)).await
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        self.token.cancel();
        self.state.release_subscription();
        debug!("Subscription ended for {}", self.state.uri);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let state = ReaderState::new("file:///tmp/app.json");
        assert!(state.ensure_open().is_ok());
        assert!(state.close());
        assert!(!state.close());
        assert!(matches!(state.ensure_open(), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_close_aborts_pending_operation() {
        let state = ReaderState::new("redis://localhost/app");
        let pending = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .until_closed(std::future::pending::<Result<Vec<u8>>>())
                    .await
            })
        };
        tokio::task::yield_now().await;
        state.close();
        assert!(matches!(pending.await.unwrap(), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_single_subscription_slot() {
        let state = ReaderState::new("file:///tmp/app.json");
        let (sink, _rx) = state.begin_subscription(CancellationToken::new()).unwrap();

        let second = state.begin_subscription(CancellationToken::new());
        assert!(matches!(second, Err(Error::AlreadySubscribed)));
        assert!(!sink.is_cancelled());

        drop(sink);
        assert!(!state.is_subscribed());
        assert!(state.begin_subscription(CancellationToken::new()).is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_after_close_fails() {
        let state = ReaderState::new("file:///tmp/app.json");
        state.close();
        assert!(matches!(
            state.begin_subscription(CancellationToken::new()),
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_cancels_active_sink() {
        let state = ReaderState::new("ws://localhost/feed");
        let (sink, _rx) = state.begin_subscription(CancellationToken::new()).unwrap();
        state.close();
        assert!(sink.is_cancelled());
        assert!(!sink.emit_data(b"late".to_vec()).await);
    }

    #[tokio::test]
    async fn test_caller_cancel_propagates() {
        let state = ReaderState::new("ws://localhost/feed");
        let cancel = CancellationToken::new();
        let (sink, _rx) = state.begin_subscription(cancel.clone()).unwrap();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), sink.cancelled())
            .await
            .expect("sink should observe caller cancellation");
        assert!(!state.is_closed());
    }

    #[tokio::test]
    async fn test_dropping_sink_closes_queue() {
        let state = ReaderState::new("http://localhost/app.json");
        let (sink, mut rx) = state.begin_subscription(CancellationToken::new()).unwrap();
        assert!(sink.emit_data(b"{}".to_vec()).await);
        drop(sink);

        let event = rx.recv().await.expect("buffered event is still delivered");
        assert!(event.is_valid());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_receiver_frees_slot() {
        let state = ReaderState::new("file:///tmp/app.json");
        let (sink, rx) = state.begin_subscription(CancellationToken::new()).unwrap();
        // A producer on a quiet source only waits for the stop signal
        let producer = tokio::spawn(async move { sink.cancelled().await });

        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer should stop once the receiver is gone")
            .unwrap();
        assert!(!state.is_subscribed());
        assert!(state.begin_subscription(CancellationToken::new()).is_ok());
    }

    #[tokio::test]
    async fn test_pause_stops_when_receiver_dropped() {
        let state = ReaderState::new("ws://localhost/feed");
        let (sink, rx) = state.begin_subscription(CancellationToken::new()).unwrap();
        drop(rx);
        assert!(sink.is_cancelled());
        assert!(!sink.pause(Duration::from_secs(30)).await);
    }
}
