//! HTTP reader with SSE subscriptions.

use crate::config::{request_url, HttpConfig};
use crate::sse::SseParser;
use async_stream::stream;
use async_trait::async_trait;
use confwire_core::{
    expect_scheme, parse_uri, retry_fixed, run_resilient, CancellationToken, ConfReader, Error,
    ReadEvent, ReaderState, Result, StreamConnector,
};
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

/// Reads configuration over HTTP(S) and follows it through Server-Sent
/// Events.
pub struct HttpReader {
    state: Arc<ReaderState>,
    url: Url,
    client: Client,
    config: HttpConfig,
}

impl HttpReader {
    /// Build a reader for an `http://` or `https://` URI.
    pub fn new(uri: &str) -> Result<Self> {
        let parsed = parse_uri(uri)?;
        expect_scheme(&parsed, &["http", "https"])?;
        let config = HttpConfig::from_url(&parsed)?;

        // No overall request timeout: it would cut long-lived event streams.
        // One-shot reads set a per-request timeout instead.
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .default_headers(config.headers.clone())
            .danger_accept_invalid_certs(config.tls_insecure)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to build HTTP client: {}", e)))?;

        debug!(
            "Created HTTP reader for {} (timeout {:?}, {} attempts)",
            parsed.host_str().unwrap_or_default(),
            config.timeout(),
            config.common.retry.attempts
        );
        Ok(Self {
            state: ReaderState::new(uri),
            url: request_url(&parsed),
            client,
            config,
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    async fn fetch(&self) -> Result<Vec<u8>> {
        let timeout = self.config.timeout();
        let response = self
            .client
            .get(self.url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| request_error(e, timeout))?;
        Ok(body.to_vec())
    }
}

fn request_error(err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::Transport(err.to_string())
    }
}

#[async_trait]
impl ConfReader for HttpReader {
    fn uri(&self) -> &str {
        self.state.uri()
    }

    async fn read(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.state
            .until_closed(retry_fixed(&self.config.common.retry, cancel, "HTTP fetch", || {
                self.fetch()
            }))
            .await
    }

    async fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<ReadEvent>> {
        let (sink, events) = self.state.begin_subscription(cancel)?;
        let connector = SseConnector {
            client: self.client.clone(),
            url: self.url.clone(),
        };
        info!("Subscribing to event stream at {}", self.url);
        tokio::spawn(run_resilient(connector, sink, self.config.retry_delay()));
        Ok(events)
    }

    async fn close(&self) -> Result<()> {
        self.state.close();
        Ok(())
    }
}

/// One SSE connection per `connect`; each message is one event payload.
struct SseConnector {
    client: Client,
    url: Url,
}

#[async_trait]
impl StreamConnector for SseConnector {
    type Message = Vec<u8>;

    async fn connect(&self) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| Error::Transport(format!("SSE connection failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }

        let events = stream! {
            let mut parser = SseParser::new();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        for event in parser.push(&bytes) {
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        yield Err(Error::Transport(format!("SSE stream error: {}", e)));
                        break;
                    }
                }
            }
            if parser.has_pending() {
                debug!("Discarding incomplete SSE event at end of stream");
            }
        };
        Ok(events.boxed())
    }

    fn decode(&self, message: Vec<u8>) -> Option<Result<Vec<u8>>> {
        Some(Ok(message))
    }

    fn end_of_stream(&self) -> Option<Error> {
        Some(Error::StreamClosed("server closed the event stream".into()))
    }
}
