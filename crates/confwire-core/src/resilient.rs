//! Reconnecting subscription driver shared by streaming transports.
//!
//! Streaming readers (SSE, WebSocket) all follow the same loop: connect,
//! forward each message as an event, and on any failure emit an error event,
//! wait the retry delay and connect again, until the subscription is
//! cancelled. Transports only describe how to connect and how to turn one
//! message into a payload.

use crate::{error::Result, reader::EventSink, Error};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Transport-specific half of a resilient subscription.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// Unit of data produced by one connection.
    type Message: Send + 'static;

    /// Open one connection and return its message stream.
    ///
    /// Resources tied to the connection must be released when the stream is
    /// dropped.
    async fn connect(&self) -> Result<BoxStream<'static, Result<Self::Message>>>;

    /// Turn a message into a payload.
    ///
    /// `None` skips the message. `Some(Err(_))` is reported as an error event
    /// and ends the current connection.
    fn decode(&self, message: Self::Message) -> Option<Result<Vec<u8>>>;

    /// Error to report when a connection's stream ends on its own.
    ///
    /// `None` treats the end as a clean shutdown.
    fn end_of_stream(&self) -> Option<Error> {
        None
    }
}

enum SessionEnd {
    /// Connection ended; reconnect after the delay.
    Reconnect,
    /// Subscription is over.
    Stop,
}

/// Drive `connector` until the sink is cancelled.
///
/// Runs on the subscription task; the sink (and with it the delivery queue)
/// is dropped when this returns.
pub async fn run_resilient<C: StreamConnector>(connector: C, sink: EventSink, retry_delay: Duration) {
    let mut connection = 0u64;
    loop {
        if sink.is_cancelled() {
            break;
        }
        connection += 1;

        let connected = tokio::select! {
            biased;
            _ = sink.cancelled() => break,
            connected = connector.connect() => connected,
        };

        let end = match connected {
            Ok(stream) => {
                info!("Connected to {} (connection #{})", sink.uri(), connection);
                pump(&connector, stream, &sink).await
            }
            Err(err) => {
                warn!("Connection to {} failed: {}", sink.uri(), err);
                if sink.emit_error(err).await {
                    SessionEnd::Reconnect
                } else {
                    SessionEnd::Stop
                }
            }
        };

        if matches!(end, SessionEnd::Stop) {
            break;
        }

        debug!("Reconnecting to {} in {:?}", sink.uri(), retry_delay);
        if !sink.pause(retry_delay).await {
            break;
        }
    }
    debug!("Resilient subscription for {} stopped", sink.uri());
}

async fn pump<C: StreamConnector>(
    connector: &C,
    mut stream: BoxStream<'static, Result<C::Message>>,
    sink: &EventSink,
) -> SessionEnd {
    loop {
        let next = tokio::select! {
            biased;
            _ = sink.cancelled() => return SessionEnd::Stop,
            next = stream.next() => next,
        };

        let failure = match next {
            Some(Ok(message)) => match connector.decode(message) {
                None => continue,
                Some(Ok(data)) => {
                    if !sink.emit_data(data).await {
                        return SessionEnd::Stop;
                    }
                    continue;
                }
                Some(Err(err)) => err,
            },
            Some(Err(err)) => err,
            None => match connector.end_of_stream() {
                Some(err) => err,
                None => {
                    debug!("Stream from {} closed cleanly", sink.uri());
                    return SessionEnd::Reconnect;
                }
            },
        };

        warn!("Stream from {} failed: {}", sink.uri(), failure);
        return if sink.emit_error(failure).await {
            SessionEnd::Reconnect
        } else {
            SessionEnd::Stop
        };
    }
}
