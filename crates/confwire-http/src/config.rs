//! HTTP reader configuration parsed from the URI.

use confwire_core::{basic_auth, CommonConfig, Error, QueryParams, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use std::time::Duration;
use url::Url;

/// Settings for one HTTP reader.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Timeout, retry attempts and retry/reconnect delay
    pub common: CommonConfig,
    /// Headers sent with every request, including Basic auth
    pub headers: HeaderMap,
    /// Skip certificate verification
    pub tls_insecure: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            headers: HeaderMap::new(),
            tls_insecure: false,
        }
    }
}

impl HttpConfig {
    /// Build the configuration from query parameters and user-info.
    pub fn from_url(url: &Url) -> Result<Self> {
        let query = QueryParams::from_url(url);
        let mut headers = HeaderMap::new();

        for (name, value) in query.headers() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::invalid_config(format!("header_{}", name), e.to_string()))?;
            let header_value = HeaderValue::from_str(&value)
                .map_err(|e| Error::invalid_config(format!("header_{}", name), e.to_string()))?;
            headers.insert(header_name, header_value);
        }

        // User-info credentials take precedence over a header_Authorization parameter
        if let Some(credentials) = basic_auth(url) {
            let mut value = HeaderValue::from_str(&credentials)
                .map_err(|e| Error::invalid_config("userinfo", e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            common: CommonConfig::from_query(&query)?,
            headers,
            tls_insecure: query.flag("tls_insecure"),
        })
    }

    /// Timeout for a single request.
    pub fn timeout(&self) -> Duration {
        self.common.timeout
    }

    /// Pause between attempts and between reconnects.
    pub fn retry_delay(&self) -> Duration {
        self.common.retry.delay
    }
}

/// Target of every request: the URI without credentials or fragment.
pub fn request_url(url: &Url) -> Url {
    let mut target = url.clone();
    // Neither call can fail for http(s) URLs
    let _ = target.set_username("");
    let _ = target.set_password(None);
    target.set_fragment(None);
    target
}
