//! WebSocket reader.

use crate::config::WsConfig;
use crate::tls::insecure_connector;
use async_stream::stream;
use async_trait::async_trait;
use confwire_core::{
    expect_scheme, parse_uri, retry_fixed, run_resilient, CancellationToken, ConfReader, Error,
    ReadEvent, ReaderState, Result, StreamConnector,
};
use futures::stream::{BoxStream, SplitSink};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reads configuration from WebSocket messages.
///
/// A one-shot read takes the first data message. A subscription emits one
/// event per data message and redials after any disconnect.
pub struct WsReader {
    state: Arc<ReaderState>,
    dialer: Arc<Dialer>,
    config: WsConfig,
}

impl WsReader {
    /// Build a reader for a `ws://` or `wss://` URI.
    pub fn new(uri: &str) -> Result<Self> {
        let parsed = parse_uri(uri)?;
        expect_scheme(&parsed, &["ws", "wss"])?;
        let config = WsConfig::from_url(&parsed)?;

        let mut target = parsed.clone();
        let _ = target.set_username("");
        let _ = target.set_password(None);
        target.set_fragment(None);

        debug!(
            "Created WebSocket reader for {} (ping {:?}, pong wait {:?})",
            target, config.ping_interval, config.pong_wait
        );
        Ok(Self {
            state: ReaderState::new(uri),
            dialer: Arc::new(Dialer {
                url: target,
                config: config.clone(),
            }),
            config,
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> &WsConfig {
        &self.config
    }
}

/// Opens connections with the configured headers and TLS settings.
struct Dialer {
    url: Url,
    config: WsConfig,
}

impl Dialer {
    fn request(&self) -> Result<Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Transport(format!("Invalid WebSocket request: {}", e)))?;
        for (name, value) in &self.config.headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }
        Ok(request)
    }

    async fn dial(&self) -> Result<Socket> {
        let request = self.request()?;
        let connector = if self.config.tls_insecure && self.url.scheme() == "wss" {
            Some(insecure_connector()?)
        } else {
            None
        };

        let timeout = self.config.common.timeout;
        let handshake =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
        let (socket, response) = tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| Error::Timeout(timeout))?
            .map_err(|e| Error::Transport(format!("WebSocket dial failed: {}", e)))?;

        debug!("WebSocket handshake with {} returned {}", self.url, response.status());
        Ok(socket)
    }

    /// Dial, take the first data message, then close.
    async fn read_once(&self) -> Result<Vec<u8>> {
        let mut socket = self.dial().await?;
        let timeout = self.config.common.timeout;

        let outcome = tokio::time::timeout(timeout, async {
            while let Some(message) = socket.next().await {
                let message = message.map_err(read_error)?;
                if let Some(decoded) = decode_message(message) {
                    return decoded;
                }
            }
            Err(Error::StreamClosed("connection closed before any data".into()))
        })
        .await
        .unwrap_or(Err(Error::Timeout(timeout)));

        if let Err(e) = socket.close(None).await {
            trace!("Ignoring close error after one-shot read: {}", e);
        }
        outcome
    }
}

/// Payload of a data message, `None` for control frames and clean closes.
fn decode_message(message: Message) -> Option<Result<Vec<u8>>> {
    match message {
        Message::Text(text) => Some(Ok(text.as_bytes().to_vec())),
        Message::Binary(data) => Some(Ok(data.to_vec())),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        Message::Close(frame) => close_outcome(frame.as_ref()).err().map(Err),
    }
}

/// Normal and going-away closes are clean; anything else is abnormal.
fn close_outcome(frame: Option<&CloseFrame>) -> Result<()> {
    match frame {
        Some(frame) if matches!(frame.code, CloseCode::Normal | CloseCode::Away) => {
            debug!("WebSocket closed cleanly ({})", frame.code);
            Ok(())
        }
        Some(frame) => Err(Error::Protocol(format!(
            "connection closed with code {}: {}",
            frame.code,
            frame.reason.as_str()
        ))),
        None => Err(Error::Protocol("connection closed without a status code".into())),
    }
}

fn read_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Io(e) => Error::Io(e),
        other => Error::Transport(format!("WebSocket read failed: {}", other)),
    }
}

#[async_trait]
impl ConfReader for WsReader {
    fn uri(&self) -> &str {
        self.state.uri()
    }

    async fn read(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.state
            .until_closed(retry_fixed(&self.config.common.retry, cancel, "WebSocket read", || {
                self.dialer.read_once()
            }))
            .await
    }

    async fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<ReadEvent>> {
        let (sink, events) = self.state.begin_subscription(cancel)?;
        info!("Subscribing to WebSocket feed at {}", self.dialer.url);
        let connector = WsConnector {
            dialer: self.dialer.clone(),
        };
        tokio::spawn(run_resilient(connector, sink, self.config.common.retry.delay));
        Ok(events)
    }

    async fn close(&self) -> Result<()> {
        self.state.close();
        Ok(())
    }
}

struct WsConnector {
    dialer: Arc<Dialer>,
}

enum Incoming {
    Message(Message),
    Pong,
    Failed(Error),
    Ended,
}

#[async_trait]
impl StreamConnector for WsConnector {
    type Message = Message;

    async fn connect(&self) -> Result<BoxStream<'static, Result<Message>>> {
        let socket = self.dialer.dial().await?;
        let (write, mut read) = socket.split();

        let config = &self.dialer.config;
        let pong_wait = config.pong_wait;
        let session = CancellationToken::new();
        tokio::spawn(keepalive(
            write,
            session.clone(),
            config.ping_interval,
            config.write_wait,
        ));

        // Dropping the stream ends the session, which stops the keepalive task
        let session_guard = session.drop_guard();
        let messages = stream! {
            let _session_guard = session_guard;
            let pong_deadline = tokio::time::sleep(pong_wait);
            tokio::pin!(pong_deadline);

            loop {
                let incoming = tokio::select! {
                    _ = &mut pong_deadline => Incoming::Failed(Error::Timeout(pong_wait)),
                    next = read.next() => match next {
                        None => Incoming::Ended,
                        Some(Ok(Message::Pong(_))) => Incoming::Pong,
                        Some(Ok(message)) => Incoming::Message(message),
                        Some(Err(e)) => Incoming::Failed(read_error(e)),
                    },
                };

                match incoming {
                    Incoming::Pong => {
                        trace!("Pong received, extending deadline by {:?}", pong_wait);
                        pong_deadline.as_mut().reset(Instant::now() + pong_wait);
                    }
                    Incoming::Message(message) => yield Ok(message),
                    Incoming::Failed(err) => {
                        yield Err(err);
                        break;
                    }
                    Incoming::Ended => break,
                }
            }
        };
        Ok(messages.boxed())
    }

    fn decode(&self, message: Message) -> Option<Result<Vec<u8>>> {
        decode_message(message)
    }
}

/// Ping the server until the session ends or a write fails.
async fn keepalive(
    mut write: SplitSink<Socket, Message>,
    session: CancellationToken,
    ping_interval: Duration,
    write_wait: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    loop {
        tokio::select! {
            biased;
            _ = session.cancelled() => break,
            _ = ticker.tick() => {
                match tokio::time::timeout(write_wait, write.send(Message::Ping(Default::default()))).await {
                    Ok(Ok(())) => trace!("Ping sent"),
                    Ok(Err(e)) => {
                        warn!("Ping failed: {}", e);
                        return;
                    }
                    Err(_) => {
                        warn!("Ping write exceeded {:?}", write_wait);
                        return;
                    }
                }
            }
        }
    }

    if let Ok(Err(e)) = tokio::time::timeout(write_wait, write.close()).await {
        trace!("Ignoring close error on teardown: {}", e);
    }
}
