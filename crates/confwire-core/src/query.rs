//! Typed access to URI query parameters.
//!
//! Every reader derives its configuration from the query string once, at
//! construction. Values are validated here so bad input never reaches a
//! transport.

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default timeout for a single network operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix marking a query parameter as a request header.
pub const HEADER_PREFIX: &str = "header_";

/// Decoded query parameters of a URI.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Collect the query parameters of a parsed URI.
    pub fn from_url(url: &Url) -> Self {
        Self {
            pairs: url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    /// First value for a key, ignoring empty values.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Parse a value with `FromStr`.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| Error::invalid_config(key, format!("'{}': {}", raw, e))),
        }
    }

    /// A strictly positive duration such as `500ms` or `30s`.
    pub fn duration(&self, key: &str, default: Duration) -> Result<Duration> {
        let value = self.duration_or_zero(key, default)?;
        if value.is_zero() {
            return Err(Error::invalid_config(key, "must be greater than zero"));
        }
        Ok(value)
    }

    /// A duration that may be zero.
    pub fn duration_or_zero(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => humantime::parse_duration(raw.trim())
                .map_err(|e| Error::invalid_config(key, format!("'{}': {}", raw, e))),
        }
    }

    /// An integer that must be at least one.
    pub fn positive(&self, key: &str, default: u32) -> Result<u32> {
        match self.parse::<i64>(key)? {
            None => Ok(default),
            Some(n) if n >= 1 => {
                u32::try_from(n).map_err(|_| Error::invalid_config(key, "value too large"))
            }
            Some(n) => Err(Error::invalid_config(key, format!("must be at least 1, got {}", n))),
        }
    }

    /// An integer that must not be negative.
    pub fn non_negative(&self, key: &str, default: u32) -> Result<u32> {
        match self.parse::<i64>(key)? {
            None => Ok(default),
            Some(n) if n >= 0 => {
                u32::try_from(n).map_err(|_| Error::invalid_config(key, "value too large"))
            }
            Some(n) => Err(Error::invalid_config(key, format!("must be non-negative, got {}", n))),
        }
    }

    /// True only for the literal value `true`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    /// `header_<Name>=<Value>` parameters as `(Name, Value)` pairs.
    ///
    /// The first occurrence of a header name wins.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = Vec::new();
        for (key, value) in &self.pairs {
            let Some(name) = key.strip_prefix(HEADER_PREFIX) else {
                continue;
            };
            if name.is_empty() || headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
                continue;
            }
            headers.push((name.to_string(), value.clone()));
        }
        headers
    }
}

/// Settings every network reader understands: `timeout`, `retry_attempts`
/// and `retry_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonConfig {
    /// Timeout for one network operation
    pub timeout: Duration,
    /// Retry policy for one-shot reads and reconnect delay for subscriptions
    pub retry: RetryPolicy,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl CommonConfig {
    /// Read the shared settings from query parameters.
    pub fn from_query(query: &QueryParams) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            timeout: query.duration("timeout", defaults.timeout)?,
            retry: RetryPolicy {
                attempts: query.positive("retry_attempts", defaults.retry.attempts)?,
                delay: query.duration_or_zero("retry_delay", defaults.retry.delay)?,
            },
        })
    }
}

/// `Authorization` header value for the URI's user-info, if any.
///
/// Produces HTTP Basic credentials; a user without a password gets an empty
/// password.
pub fn basic_auth(url: &Url) -> Option<String> {
    if url.username().is_empty() {
        return None;
    }
    let username = urlencoding::decode(url.username()).ok()?;
    let password = match url.password() {
        Some(p) => urlencoding::decode(p).ok()?.into_owned(),
        None => String::new(),
    };
    let credentials = format!("{}:{}", username, password);
    Some(format!("Basic {}", STANDARD.encode(credentials)))
}
