//! URI schemes and the scheme → reader constructor registry.

use crate::{
    error::{Error, Result},
    reader::ConfReader,
};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use url::Url;

/// Lowercase protocol tag used to pick a reader.
///
/// The empty scheme stands for a bare local path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scheme(String);

impl Scheme {
    /// Create a scheme, normalizing to lowercase.
    pub fn new(scheme: impl AsRef<str>) -> Self {
        Self(scheme.as_ref().to_ascii_lowercase())
    }

    /// The scheme of bare local paths.
    pub fn local() -> Self {
        Self(String::new())
    }

    /// Scheme tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the bare-path scheme.
    pub fn is_local(&self) -> bool {
        self.0.is_empty()
    }

    /// Detect the scheme of a URI without fully parsing it.
    ///
    /// Strings with no `scheme:` prefix are local paths. A present but empty
    /// scheme (`://host`) is rejected.
    pub fn detect(uri: &str) -> Result<Self> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_uri(uri, "empty URI"));
        }
        if trimmed.starts_with(':') {
            return Err(Error::invalid_uri(uri, "missing scheme"));
        }

        let Some(colon) = trimmed.find(':') else {
            return Ok(Self::local());
        };
        let candidate = &trimmed[..colon];
        let mut chars = candidate.chars();
        let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
        let valid = starts_alpha
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid {
            return Ok(Self::local());
        }
        // Drive letters such as `C:\config.json`
        if cfg!(windows) && candidate.len() == 1 {
            return Ok(Self::local());
        }
        Ok(Self::new(candidate))
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Scheme {
    fn from(value: &str) -> Self {
        Scheme::new(value)
    }
}

/// Parse an absolute URI, rejecting blanks and scheme-less strings.
pub fn parse_uri(uri: &str) -> Result<Url> {
    let scheme = Scheme::detect(uri)?;
    if scheme.is_local() {
        return Err(Error::invalid_uri(uri, "missing scheme"));
    }
    Url::parse(uri.trim()).map_err(|e| Error::invalid_uri(uri, e.to_string()))
}

/// Ensure a parsed URI uses one of the schemes a reader accepts.
pub fn expect_scheme(url: &Url, accepted: &[&str]) -> Result<()> {
    if accepted.iter().any(|s| url.scheme().eq_ignore_ascii_case(s)) {
        Ok(())
    } else {
        Err(Error::UnsupportedScheme(format!(
            "{} (expected {})",
            url.scheme(),
            accepted.join(" or ")
        )))
    }
}

/// Constructor that builds a reader from a URI.
pub type ReaderConstructor = fn(&str) -> Result<Box<dyn ConfReader>>;

/// Maps schemes to reader constructors.
///
/// Populated once, then only read. Resolution happens before any network or
/// filesystem access.
#[derive(Default, Clone)]
pub struct Registry {
    constructors: HashMap<Scheme, ReaderConstructor>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a scheme.
    pub fn register(&mut self, scheme: impl Into<Scheme>, constructor: ReaderConstructor) -> Result<()> {
        let scheme = scheme.into();
        if self.constructors.contains_key(&scheme) {
            return Err(Error::DuplicateScheme(scheme.to_string()));
        }
        debug!("Registered reader for scheme '{}'", scheme);
        self.constructors.insert(scheme, constructor);
        Ok(())
    }

    /// Whether a scheme has a constructor.
    pub fn contains(&self, scheme: &Scheme) -> bool {
        self.constructors.contains_key(scheme)
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<Scheme> {
        let mut schemes: Vec<Scheme> = self.constructors.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Build a reader for an explicit scheme.
    pub fn get(&self, scheme: &Scheme, uri: &str) -> Result<Box<dyn ConfReader>> {
        let constructor = self
            .constructors
            .get(scheme)
            .ok_or_else(|| Error::UnsupportedScheme(scheme.to_string()))?;
        constructor(uri)
    }

    /// Resolve a URI to its scheme and build the matching reader.
    pub fn open(&self, uri: &str) -> Result<Box<dyn ConfReader>> {
        let scheme = Scheme::detect(uri)?;
        if !scheme.is_local() {
            Url::parse(uri.trim()).map_err(|e| Error::invalid_uri(uri, e.to_string()))?;
        }
        if !self.contains(&scheme) {
            return Err(Error::UnsupportedScheme(scheme.to_string()));
        }
        debug!("Opening reader for '{}' (scheme '{}')", uri, scheme);
        self.get(&scheme, uri)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
