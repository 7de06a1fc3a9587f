//! WebSocket reader configuration parsed from the URI.

use confwire_core::{basic_auth, CommonConfig, Error, QueryParams, Result};
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;
use url::Url;

/// Default interval between keepalive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default time allowed between pongs before the connection is considered dead.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Default bound on a single control-frame write.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Settings for one WebSocket reader.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Dial/read timeout, retry attempts and retry/reconnect delay
    pub common: CommonConfig,
    /// Interval between keepalive pings
    pub ping_interval: Duration,
    /// Pong deadline, extended on every pong
    pub pong_wait: Duration,
    /// Bound on each ping write
    pub write_wait: Duration,
    /// Handshake headers, including Basic auth
    pub headers: HeaderMap,
    /// Skip certificate verification for `wss`
    pub tls_insecure: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_wait: DEFAULT_PONG_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
            headers: HeaderMap::new(),
            tls_insecure: false,
        }
    }
}

impl WsConfig {
    /// Build the configuration from query parameters and user-info.
    pub fn from_url(url: &Url) -> Result<Self> {
        let query = QueryParams::from_url(url);
        let defaults = Self::default();

        let mut headers = HeaderMap::new();
        for (name, value) in query.headers() {
            let param = format!("header_{}", name);
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::invalid_config(param.as_str(), e.to_string()))?;
            let header_value = HeaderValue::from_str(&value)
                .map_err(|e| Error::invalid_config(param.as_str(), e.to_string()))?;
            headers.insert(header_name, header_value);
        }
        if let Some(credentials) = basic_auth(url) {
            let value = HeaderValue::from_str(&credentials)
                .map_err(|e| Error::invalid_config("userinfo", e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let config = Self {
            common: CommonConfig::from_query(&query)?,
            ping_interval: query.duration("ping_interval", defaults.ping_interval)?,
            pong_wait: query.duration("pong_wait", defaults.pong_wait)?,
            write_wait: query.duration("write_wait", defaults.write_wait)?,
            headers,
            tls_insecure: query.flag("tls_insecure"),
        };

        if config.pong_wait <= config.ping_interval {
            warn!(
                "pong_wait ({:?}) is not longer than ping_interval ({:?}); healthy connections may time out",
                config.pong_wait, config.ping_interval
            );
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(uri: &str) -> Result<WsConfig> {
        WsConfig::from_url(&Url::parse(uri).unwrap())
    }

    #[test]
    fn test_defaults() {
        let config = config("ws://localhost:8080/config").unwrap();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_eq!(config.write_wait, Duration::from_secs(10));
        assert_eq!(config.common.timeout, Duration::from_secs(30));
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_keepalive_overrides() {
        let config =
            config("wss://host/feed?ping_interval=5s&pong_wait=12s&write_wait=500ms&tls_insecure=true")
                .unwrap();
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.pong_wait, Duration::from_secs(12));
        assert_eq!(config.write_wait, Duration::from_millis(500));
        assert!(config.tls_insecure);
    }

    #[test]
    fn test_handshake_headers() {
        let config = config("ws://bot:tok@host/feed?header_X-Client=cli").unwrap();
        assert_eq!(config.headers.get("x-client").unwrap(), "cli");
        // "bot:tok"
        assert_eq!(config.headers.get(AUTHORIZATION).unwrap(), "Basic Ym90OnRvaw==");
    }

    #[test]
    fn test_zero_ping_interval_rejected() {
        let err = config("ws://host/feed?ping_interval=0s").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }
}
