//! Redis reader configuration and keyspace-notification helpers.

use confwire_core::{CommonConfig, Error, QueryParams, Result};
use std::time::Duration;
use url::Url;

/// Port used when the URI has none.
pub const DEFAULT_PORT: u16 = 6379;

/// Host used when the URI has none.
pub const DEFAULT_HOST: &str = "localhost";

/// Default connection pool size.
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Default number of idle connections to keep.
pub const DEFAULT_MIN_IDLE_CONNS: u32 = 1;

/// Settings for one Redis reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// ACL user, only when both user and password are given
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Logical database
    pub db: u32,
    /// Key holding the configuration
    pub key: String,
    /// Hash field, read with HGET instead of GET
    pub field: Option<String>,
    /// Connect over TLS (`rediss`)
    pub tls: bool,
    /// Skip certificate verification
    pub tls_insecure: bool,
    /// Operation timeout, retry attempts and retry delay
    pub common: CommonConfig,
    /// Requested pool size
    pub pool_size: u32,
    /// Requested idle connections
    pub min_idle_conns: u32,
}

impl RedisConfig {
    /// Parse `redis[s]://[user[:pass]@]host[:port]/<key>[?query][#field]`.
    pub fn from_url(url: &Url) -> Result<Self> {
        let query = QueryParams::from_url(url);
        let tls = url.scheme().eq_ignore_ascii_case("rediss");

        let key = decode(url.path().trim_start_matches('/'), "key")?;
        if key.is_empty() {
            return Err(Error::invalid_uri(
                url.as_str(),
                "Redis key must be specified in the path",
            ));
        }
        let field = match url.fragment() {
            Some(fragment) if !fragment.is_empty() => Some(decode(fragment, "field")?),
            _ => None,
        };

        // A lone user-info value is the password
        let user = decode(url.username(), "username")?;
        let (username, password) = match url.password() {
            Some(pass) if !pass.is_empty() => {
                let pass = decode(pass, "password")?;
                ((!user.is_empty()).then_some(user), Some(pass))
            }
            _ => (None, (!user.is_empty()).then_some(user)),
        };

        let mut common = CommonConfig::from_query(&query)?;
        if query.get("retry_attempts").is_none() {
            common.retry.attempts = query.positive("max_retries", common.retry.attempts)?;
        }

        let pool_size = query.positive("pool_size", DEFAULT_POOL_SIZE)?;
        let min_idle_conns = query.non_negative("min_idle_conns", DEFAULT_MIN_IDLE_CONNS)?;
        if min_idle_conns > pool_size {
            return Err(Error::invalid_config(
                "min_idle_conns",
                format!("{} exceeds pool_size {}", min_idle_conns, pool_size),
            ));
        }

        Ok(Self {
            host: url
                .host_str()
                .filter(|h| !h.is_empty())
                .unwrap_or(DEFAULT_HOST)
                .to_string(),
            port: url.port().unwrap_or(DEFAULT_PORT),
            username,
            password,
            db: query.non_negative("db", 0)?,
            key,
            field,
            tls,
            tls_insecure: tls && query.flag("tls_insecure"),
            common,
            pool_size,
            min_idle_conns,
        })
    }

    /// Timeout for one Redis operation.
    pub fn timeout(&self) -> Duration {
        self.common.timeout
    }

    /// Connection URL understood by the redis client.
    pub fn connection_url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                format!("{}:{}@", urlencoding::encode(user), urlencoding::encode(pass))
            }
            (None, Some(pass)) => format!(":{}@", urlencoding::encode(pass)),
            _ => String::new(),
        };
        let insecure = if self.tls_insecure { "#insecure" } else { "" };
        format!(
            "{}://{}{}:{}/{}{}",
            scheme, auth, self.host, self.port, self.db, insecure
        )
    }

    /// Pattern matching keyspace notifications for the configured key.
    pub fn keyspace_pattern(&self) -> String {
        format!("__keyspace@{}__:{}", self.db, escape_glob(&self.key))
    }

    /// Human-readable name of the watched value.
    pub fn target(&self) -> String {
        match &self.field {
            Some(field) => format!("field '{}' of key '{}'", field, self.key),
            None => format!("key '{}'", self.key),
        }
    }
}

fn decode(raw: &str, what: &str) -> Result<String> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|e| Error::invalid_config(what, e.to_string()))
}

/// Escape glob metacharacters so a key matches only itself in PSUBSCRIBE.
pub fn escape_glob(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Flags to set so keyspace events for the watched value are published.
///
/// Returns `None` when `current` already covers them. Existing flags are
/// kept; `K` is added for keyspace events, plus `g` and either `$` (string
/// keys) or `h` (hash fields). `A` already covers every command class.
pub fn patch_notify_flags(current: &str, hash_field: bool) -> Option<String> {
    let class = if hash_field { 'h' } else { '$' };
    let mut patched = current.to_string();

    if !patched.contains('K') {
        patched.push('K');
    }
    if !current.contains('A') {
        for needed in ['g', class] {
            if !patched.contains(needed) {
                patched.push(needed);
            }
        }
    }

    (patched != current).then_some(patched)
}
